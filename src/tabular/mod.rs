//! Tabular store integration (subscriber source of truth).
//!
//! REST client over the store's `/{baseId}/{table}` API with bearer auth,
//! bounded cursor pagination and a client-side request timeout. Field names
//! drift between schema revisions, so subscriber records go through the alias
//! table in `fields` before reaching the rest of the crate.

pub mod client;
pub mod fields;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Priority, Subscriber, Ticket, TicketStatus};

pub use client::TabularStoreClient;

/// Errors from tabular store operations.
#[derive(Debug, thiserror::Error)]
pub enum TabularError {
    #[error("Tabular store API key or base id not configured")]
    ConfigurationMissing,
    #[error("Invalid tabular store configuration: {0}")]
    InvalidConfig(String),
    #[error("Tabular store request timed out after {0} seconds")]
    Timeout(u64),
    #[error("Tabular store request failed: {0}")]
    Network(String),
    /// `body` is kept out of the message; callers log it.
    #[error("Tabular store API error {status} {reason}")]
    Upstream {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("Failed to parse tabular store response: {0}")]
    Decode(String),
}

/// A record as the store returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

/// A record written by us (ticket mirror). Same wire shape as `RawRecord`.
pub type ExternalRecord = RawRecord;

/// Result of a bounded subscriber listing.
#[derive(Debug, Clone, Default)]
pub struct SubscriberListing {
    pub subscribers: Vec<Subscriber>,
    /// The page ceiling stopped the listing while the store still had a cursor.
    pub truncated: bool,
}

/// Seam over the tabular store used by the cache, the mirror and the gateway.
#[async_trait]
pub trait TabularSource: Send + Sync {
    async fn fetch_subscribers(&self) -> Result<SubscriberListing, TabularError>;

    async fn create_ticket_record(
        &self,
        fields: &TicketRecordFields,
    ) -> Result<ExternalRecord, TabularError>;

    async fn update_ticket_record(
        &self,
        record_id: &str,
        fields: &TicketRecordFields,
    ) -> Result<ExternalRecord, TabularError>;
}

// Column names of the tickets table in the tabular base.
const TICKET_TITLE: &str = "Titre";
const TICKET_DESCRIPTION: &str = "Description";
const TICKET_STATUS: &str = "Statut";
const TICKET_PRIORITY: &str = "Priorité";
const TICKET_CLIENT: &str = "Client";
const TICKET_EMAIL: &str = "Email";
const TICKET_CREATED_AT: &str = "Date de création";
const TICKET_UPDATED_AT: &str = "Date de modification";

/// The subset of a ticket mirrored into the tabular store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecordFields {
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub client: String,
    pub client_email: Option<String>,
}

impl TicketRecordFields {
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            status: ticket.status,
            priority: ticket.priority,
            client: ticket.subscriber_identity.clone(),
            client_email: ticket.subscriber_email.clone(),
        }
    }

    /// Request body for `POST /{table}`.
    pub fn create_body(&self, now: DateTime<Utc>) -> Value {
        let mut fields = Map::new();
        fields.insert(TICKET_TITLE.into(), Value::String(self.title.clone()));
        fields.insert(
            TICKET_DESCRIPTION.into(),
            Value::String(self.description.clone()),
        );
        fields.insert(TICKET_STATUS.into(), self.status.label().into());
        fields.insert(TICKET_PRIORITY.into(), self.priority.label().into());
        fields.insert(TICKET_CLIENT.into(), Value::String(self.client.clone()));
        if let Some(email) = &self.client_email {
            fields.insert(TICKET_EMAIL.into(), Value::String(email.clone()));
        }
        fields.insert(TICKET_CREATED_AT.into(), now.to_rfc3339().into());
        serde_json::json!({ "fields": fields })
    }

    /// Request body for `PATCH /{table}/{id}`.
    pub fn update_body(&self, now: DateTime<Utc>) -> Value {
        let mut fields = Map::new();
        fields.insert(TICKET_TITLE.into(), Value::String(self.title.clone()));
        fields.insert(
            TICKET_DESCRIPTION.into(),
            Value::String(self.description.clone()),
        );
        fields.insert(TICKET_STATUS.into(), self.status.label().into());
        fields.insert(TICKET_PRIORITY.into(), self.priority.label().into());
        fields.insert(TICKET_UPDATED_AT.into(), now.to_rfc3339().into());
        serde_json::json!({ "fields": fields })
    }
}
