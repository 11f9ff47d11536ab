use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default cap on a single uploaded document (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3001".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default = "default_title")]
    pub title: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            referer: None,
            title: default_title(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "meta-llama/llama-3.3-70b-instruct:free".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_title() -> Option<String> {
    Some("Pulse AI Chat".to_string())
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    60
}

impl UpstreamConfig {
    /// Reads the bearer credential from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "{} not found in environment variables; the chat relay cannot start without it",
                self.api_key_env
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MailConfig {
    pub inquiry: Option<SmtpConfig>,
    pub human_response: Option<SmtpConfig>,
}

/// One SMTP sending path. The password is read from `password_env`.
#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Where submissions are delivered. Defaults to `username`.
    #[serde(default)]
    pub recipient: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}
fn default_password_env() -> String {
    "SMTP_EMAIL_PASS".to_string()
}

impl SmtpConfig {
    /// Implicit TLS on 465, STARTTLS everywhere else.
    pub fn implicit_tls(&self) -> bool {
        self.port == 465
    }

    pub fn recipient(&self) -> &str {
        self.recipient.as_deref().unwrap_or(&self.username)
    }

    pub fn resolve_password(&self) -> Result<String> {
        std::env::var(&self.password_env).with_context(|| {
            format!(
                "{} not set (SMTP password for {})",
                self.password_env, self.host
            )
        })
    }
}

/// Loads the configuration file, falling back to defaults when it does not
/// exist. `PORT` in the environment overrides the port of `server.bind`.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    if let Ok(port) = std::env::var("PORT") {
        config.server.bind = override_port(&config.server.bind, &port)?;
    }

    validate(&config)?;
    Ok(config)
}

fn override_port(bind: &str, port: &str) -> Result<String> {
    let port: u16 = port
        .trim()
        .parse()
        .with_context(|| format!("PORT must be a valid port number, got '{}'", port))?;
    let mut addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("server.bind is not a socket address: {}", bind))?;
    addr.set_port(port);
    Ok(addr.to_string())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.max_upload_bytes == 0 {
        bail!("server.max_upload_bytes must be > 0");
    }

    if config.upstream.endpoint.trim().is_empty() {
        bail!("upstream.endpoint must not be empty");
    }
    if config.upstream.model.trim().is_empty() {
        bail!("upstream.model must not be empty");
    }
    if config.upstream.idle_timeout_secs == 0 {
        bail!("upstream.idle_timeout_secs must be > 0");
    }
    if config.upstream.connect_timeout_secs == 0 {
        bail!("upstream.connect_timeout_secs must be > 0");
    }

    for (name, smtp) in [
        ("inquiry", &config.mail.inquiry),
        ("human_response", &config.mail.human_response),
    ] {
        let Some(smtp) = smtp else { continue };
        if smtp.host.trim().is_empty() {
            bail!("mail.{}.host must not be empty", name);
        }
        if smtp.port == 0 {
            bail!("mail.{}.port must be > 0", name);
        }
        if smtp.username.parse::<lettre::Address>().is_err() {
            bail!(
                "mail.{}.username must be an email address, got '{}'",
                name,
                smtp.username
            );
        }
        if let Some(recipient) = &smtp.recipient {
            if recipient.parse::<lettre::Address>().is_err() {
                bail!(
                    "mail.{}.recipient must be an email address, got '{}'",
                    name,
                    recipient
                );
            }
        }
    }

    Ok(())
}
