//! Contact and human-response form delivery over SMTP.
//!
//! Two independent sending paths, each behind the [`Mailer`] trait:
//! - **inquiry**: JSON contact form rendered into an HTML email;
//! - **human response**: multipart form with an optional attachment, sent
//!   as plain text.
//!
//! Forms are validated before a mailer is ever called.

use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use askama::Template;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("{0}")]
    MissingFields(&'static str),
    #[error("Invalid email format.")]
    InvalidEmail,
    #[error("failed to render email: {0}")]
    Render(String),
}

/// Body of an outgoing mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    Html(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A mail ready for delivery. Sender address and recipient come from the
/// mailer's own configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Display name shown on the `From` header.
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: MailBody,
    pub attachment: Option<MailAttachment>,
}

/// A mail delivery backend.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<()>;
}

// ============ Disabled ============

/// Used when a `[mail.*]` section is absent or cannot be set up. Every send fails.
pub struct DisabledMailer {
    path: &'static str,
}

impl DisabledMailer {
    pub fn new(path: &'static str) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _mail: OutgoingMail) -> Result<()> {
        bail!("mail.{} is disabled (section missing or unusable)", self.path)
    }
}

// ============ SMTP ============

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Address,
    recipient: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let password = config.resolve_password()?;
        let builder = if config.implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .with_context(|| format!("invalid SMTP host: {}", config.host))?;
        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), password))
            .build();

        let sender: Address = config
            .username
            .parse()
            .with_context(|| format!("invalid sender address: {}", config.username))?;
        let recipient: Mailbox = config
            .recipient()
            .parse()
            .with_context(|| format!("invalid recipient address: {}", config.recipient()))?;

        Ok(Self {
            transport,
            sender,
            recipient,
        })
    }

    fn build_message(&self, mail: OutgoingMail) -> Result<Message> {
        let mut builder = Message::builder()
            .from(Mailbox::new(mail.from_name, self.sender.clone()))
            .to(self.recipient.clone())
            .subject(mail.subject);
        if let Some(reply_to) = mail.reply_to {
            let reply_to: Mailbox = reply_to
                .parse()
                .with_context(|| format!("invalid reply-to address: {}", reply_to))?;
            builder = builder.reply_to(reply_to);
        }

        let body_part = match mail.body {
            MailBody::Html(html) => SinglePart::html(html),
            MailBody::Text(text) => SinglePart::plain(text),
        };
        let message = match mail.attachment {
            None => builder.singlepart(body_part)?,
            Some(att) => {
                let content_type = ContentType::parse(&att.content_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(body_part)
                        .singlepart(Attachment::new(att.filename).body(att.bytes, content_type)),
                )?
            }
        };
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        let message = self.build_message(mail)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

// ============ Forms ============

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"))
}

/// Matches the form pattern and is accepted as an SMTP address.
pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email) && email.parse::<Address>().is_ok()
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// `POST /api/inquiry-email` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InquiryForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub inquiry_type: Option<String>,
}

impl InquiryForm {
    /// Validates the form and renders the mail.
    pub fn into_mail(self) -> Result<OutgoingMail, FormError> {
        let (Some(name), Some(email), Some(message)) = (
            present(&self.name),
            present(&self.email),
            present(&self.message),
        ) else {
            return Err(FormError::MissingFields(
                "Name, email, and message are required.",
            ));
        };
        if !is_valid_email(email) {
            return Err(FormError::InvalidEmail);
        }

        let company = present(&self.company).unwrap_or("N/A");
        let inquiry_type = present(&self.inquiry_type).unwrap_or("General");
        let html = InquiryEmail {
            name,
            email,
            company,
            inquiry_type,
            message,
        }
        .render()
        .map_err(|e| FormError::Render(e.to_string()))?;
        Ok(OutgoingMail {
            from_name: Some(name.to_string()),
            reply_to: Some(email.to_string()),
            subject: format!("New Inquiry from {}", name),
            body: MailBody::Html(html),
            attachment: None,
        })
    }
}

/// HTML body of an inquiry mail. Askama escapes every interpolated value.
#[derive(Template)]
#[template(path = "inquiry_email.html")]
struct InquiryEmail<'a> {
    name: &'a str,
    email: &'a str,
    company: &'a str,
    inquiry_type: &'a str,
    message: &'a str,
}

/// Fields of the multipart `POST /send-email` form.
#[derive(Debug, Clone, Default)]
pub struct HumanResponseForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub attachment: Option<MailAttachment>,
}

impl HumanResponseForm {
    pub fn into_mail(self) -> Result<OutgoingMail, FormError> {
        let (Some(name), Some(email), Some(message)) = (
            present(&self.name),
            present(&self.email),
            present(&self.message),
        ) else {
            return Err(FormError::MissingFields(
                "Name, Email, and Message are required fields.",
            ));
        };

        let mut text = format!("Name: {}\nEmail: {}\n", name, email);
        if let Some(phone) = present(&self.phone) {
            text.push_str(&format!("Phone: {}\n", phone));
        }
        text.push_str(&format!("Message: {}", message));

        Ok(OutgoingMail {
            from_name: None,
            reply_to: is_valid_email(email).then(|| email.to_string()),
            subject: "New Submission From Vdospec".to_string(),
            body: MailBody::Text(text),
            attachment: self.attachment,
        })
    }
}
