//! # Pulse Relay
//!
//! Backend for the Pulse AI site: a document-context chat relay plus SMTP
//! delivery for the contact and human-response forms.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ ┌──────────┐   ┌─────────┐
//!             │  ingest  │──▶│  store  │◀──┐
//!             │ +extract │   │ (memory)│   │ document text
//!             └──────────┘   └─────────┘   │
//!                                    ┌─────┴─────┐   data: {...}   ┌──────────┐
//!  chat ────────────────────────────▶│   relay   │◀────────────────│ upstream │
//!        ◀──── raw text deltas ──────│ reframer  │────────────────▶│   LLM    │
//!                                    └───────────┘  system + user  └──────────┘
//!  forms ──▶ mail ──▶ SMTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`store`] | In-memory document table |
//! | [`ingest`] | Upload validation, staging, and storage |
//! | [`relay`] | Upstream chat streaming and re-framing |
//! | [`mail`] | Form validation and SMTP delivery |
//! | [`server`] | HTTP server |

pub mod config;
pub mod extract;
pub mod ingest;
pub mod mail;
pub mod models;
pub mod relay;
pub mod server;
pub mod store;
