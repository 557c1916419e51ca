//! Mail provider integration: inbox listing and inbound email → ticket drafts.
//!
//! The provider is reached with an opaque bearer token; obtaining and
//! refreshing that token happens outside this crate.

pub mod client;
pub mod draft;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use client::MailClient;
pub use draft::TicketDraft;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request timed out after {0} seconds")]
    Timeout(u64),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Mail token expired or revoked")]
    AuthExpired,
    #[error("Mail API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// A parsed inbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEmail {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub date: DateTime<Utc>,
    pub snippet: String,
    /// Plain-text body; empty when the message carried none.
    pub body: String,
    pub has_attachments: bool,
    pub is_read: bool,
}

impl InboundEmail {
    /// Body when present, otherwise the provider snippet.
    pub fn content(&self) -> &str {
        if self.body.trim().is_empty() {
            &self.snippet
        } else {
            &self.body
        }
    }
}
