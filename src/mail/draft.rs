//! Inbound email → ticket draft.
//!
//! Keyword rules look at subject + snippet; the contract reference is read
//! from the body. The agent reviews the draft before it goes through the
//! gateway.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use super::InboundEmail;
use crate::resolver::{name_from_local_part, EmailSender, MatchedBy, SubscriberResolver};
use crate::types::{Channel, NewTicket, Origin, Priority, SubscriberRef, TicketStatus, TicketType};

/// First matching group wins.
const TYPE_KEYWORDS: &[(TicketType, &[&str])] = &[
    (TicketType::PaymentDetailsChange, &["prélèvement", "rib", "paiement"]),
    (TicketType::EarlyTermination, &["résiliation", "cession"]),
    (TicketType::DebtCollection, &["recouvrement", "facture", "impayé"]),
    (TicketType::InstallerComplaint, &["installateur", "plainte"]),
    (TicketType::ContractAddition, &["contrat", "ajout", "flexibilité"]),
];

const URGENT_KEYWORDS: &[&str] = &["urgent", "panne", "problème grave"];

fn contract_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)contrat[:\s]*([A-Z]{2}-\d{6})").expect("contract regex"))
}

/// Contract reference such as `SL-000123` mentioned as `contrat: SL-000123`.
pub fn extract_contract_reference(text: &str) -> Option<String> {
    contract_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

pub fn detect_ticket_type(text: &str) -> TicketType {
    let text = normalize(text);
    TYPE_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(ticket_type, _)| *ticket_type)
        .unwrap_or_default()
}

pub fn detect_priority(text: &str) -> Priority {
    let text = normalize(text);
    if URGENT_KEYWORDS.iter().any(|w| text.contains(w)) {
        Priority::High
    } else {
        Priority::Medium
    }
}

fn normalize(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

/// Pre-filled ticket form built from an inbound email.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDraft {
    pub source_email_id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TicketStatus,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub origin: Origin,
    pub channel: Channel,
    pub subscriber: SubscriberRef,
    /// What the subscriber field shows.
    pub subscriber_label: String,
    pub matched_by: MatchedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_reference: Option<String>,
}

impl TicketDraft {
    pub fn from_email(email: &InboundEmail, resolver: &SubscriberResolver<'_>) -> Self {
        let content = email.content();
        let signals = format!("{} {}", email.subject, email.snippet);
        let contract_reference = extract_contract_reference(content);

        let sender = EmailSender::parse(&email.from);
        let resolution = match &sender {
            Some(sender) => resolver.resolve_sender(sender),
            None => resolver.resolve(&email.from),
        };

        let (subscriber, subscriber_label) = match &resolution.subscriber {
            Some(found) => (SubscriberRef::Known(found.id.clone()), resolution.label.clone()),
            None => {
                let name = match &sender {
                    Some(sender) => name_from_local_part(&sender.email),
                    None => email.from.trim().to_string(),
                };
                let label = match &contract_reference {
                    Some(contract) => format!("{name} - {contract}"),
                    None => name,
                };
                (SubscriberRef::Manual(label.clone()), label)
            }
        };

        Self {
            source_email_id: email.id.clone(),
            title: email.subject.clone(),
            description: format!(
                "Email received from: {}\nDate: {}\n\n{}",
                email.from,
                email.date.format("%d/%m/%Y %H:%M"),
                content.trim()
            ),
            priority: detect_priority(&signals),
            status: TicketStatus::New,
            ticket_type: detect_ticket_type(&signals),
            origin: Origin::Subscriber,
            channel: Channel::Email,
            subscriber,
            subscriber_label,
            matched_by: resolution.matched_by,
            contract_reference,
        }
    }

    /// Creation input once the agent has confirmed the draft.
    pub fn into_new_ticket(self, created_by: Option<String>) -> NewTicket {
        NewTicket {
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: self.status,
            ticket_type: self.ticket_type,
            origin: self.origin,
            channel: self.channel,
            assigned_to: None,
            subscriber: self.subscriber,
            installer_id: None,
            created_by,
        }
    }
}
