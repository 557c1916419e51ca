use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Placeholder values shipped in the sample config. Treated as "not configured".
const PLACEHOLDER_API_KEYS: &[&str] = &["your_tabular_api_key", "votre_clé_api_airtable"];
const PLACEHOLDER_BASE_IDS: &[&str] = &["your_subscribers_base_id", "id_de_votre_base_abonnés"];

/// Top-level configuration loaded from `~/.sundesk/config.json`.
///
/// Every section is defaulted, so an absent or partial file is still a valid
/// configuration. Missing tabular credentials put the console in manual-entry
/// mode; a missing database path is fatal at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub tabular: TabularConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub subscribers: SubscriberSourceConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

/// Tabular store (subscriber source of truth) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_id: Option<String>,
    #[serde(default = "default_tabular_base_url")]
    pub base_url: String,
    #[serde(default = "default_subscribers_table")]
    pub subscribers_table: String,
    #[serde(default = "default_tickets_table")]
    pub tickets_table: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Credentials that passed the placeholder/blank checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularCredentials {
    pub api_key: String,
    pub base_id: String,
}

impl TabularConfig {
    /// Usable credentials, or `None` when either value is absent, blank, or a
    /// sample placeholder.
    pub fn credentials(&self) -> Option<TabularCredentials> {
        let api_key = self.api_key.as_deref().map(str::trim).unwrap_or("");
        let base_id = self.base_id.as_deref().map(str::trim).unwrap_or("");
        if api_key.is_empty()
            || base_id.is_empty()
            || PLACEHOLDER_API_KEYS.contains(&api_key)
            || PLACEHOLDER_BASE_IDS.contains(&base_id)
        {
            return None;
        }
        Some(TabularCredentials {
            api_key: api_key.to_string(),
            base_id: base_id.to_string(),
        })
    }
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_id: None,
            base_url: default_tabular_base_url(),
            subscribers_table: default_subscribers_table(),
            tickets_table: default_tickets_table(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_tabular_base_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_subscribers_table() -> String {
    "Abonnés".to_string()
}

fn default_tickets_table() -> String {
    "Tickets".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

/// Relational store (owned replica + ticket primary store).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

/// Tabular → relational mirror job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u32,
    /// Page ceiling for the mirror's full listing.
    #[serde(default = "default_mirror_max_pages")]
    pub max_pages: u32,
    /// Bearer token the trigger endpoint accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_token: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_minutes: default_poll_interval_minutes(),
            max_pages: default_mirror_max_pages(),
            trigger_token: None,
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_poll_interval_minutes() -> u32 {
    60
}

fn default_mirror_max_pages() -> u32 {
    20
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/// Where the subscriber cache reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberSourceKind {
    #[default]
    Tabular,
    Replica,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSourceConfig {
    #[serde(default)]
    pub source: SubscriberSourceKind,
    /// Replica source only: run the mirror once when the replica is empty.
    #[serde(default)]
    pub auto_sync_on_empty: bool,
}

/// Mail provider settings. The access token is obtained elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_mail_max_results")]
    pub max_results: u32,
    #[serde(default = "default_mail_detail_limit")]
    pub detail_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: None,
            max_results: default_mail_max_results(),
            detail_limit: default_mail_detail_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_mail_max_results() -> u32 {
    50
}

fn default_mail_detail_limit() -> usize {
    10
}

// ============================================================================
// Subscribers
// ============================================================================

/// A subscriber identity record.
///
/// `contract_reference` is never empty: sources fall back to the external
/// record id (or the row id) when the business key is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_record_id: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub contract_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Subscriber {
    /// "Firstname Lastname".
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// "Firstname Lastname - ContractRef", the label agents see on tickets.
    pub fn display_identity(&self) -> String {
        identity_label(&self.first_name, &self.last_name, &self.contract_reference)
    }
}

/// Shared formatting for `Subscriber::display_identity` and joined ticket reads.
pub fn identity_label(first_name: &str, last_name: &str, contract_reference: &str) -> String {
    let name = format!("{} {}", first_name.trim(), last_name.trim());
    format!("{} - {}", name.trim(), contract_reference)
}

// ============================================================================
// Ticket vocabulary
// ============================================================================

/// Error returned when a label matches no variant of a ticket vocabulary enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label:?}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

fn unknown(kind: &'static str, value: &str) -> UnknownLabel {
    UnknownLabel {
        kind,
        label: value.to_string(),
    }
}

/// Ticket urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: &'static [Priority] = &[Priority::Low, Priority::Medium, Priority::High];

    /// Canonical name, as stored in the relational store.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Label used by the tabular store.
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Basse",
            Priority::Medium => "Moyenne",
            Priority::High => "Haute",
        }
    }

    /// Accepts the canonical name, the tabular label, or a legacy spelling.
    pub fn parse_label(value: &str) -> Result<Self, UnknownLabel> {
        match value.trim().to_lowercase().as_str() {
            "low" | "basse" => Ok(Priority::Low),
            "medium" | "moyenne" | "normale" => Ok(Priority::Medium),
            "high" | "haute" => Ok(Priority::High),
            _ => Err(unknown("priority", value)),
        }
    }
}

/// Ticket lifecycle state. Closed tickets stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    New,
    WaitingCustomer,
    WaitingInstaller,
    WaitingTechSupport,
    Closed,
    Open,
}

impl TicketStatus {
    pub const ALL: &'static [TicketStatus] = &[
        TicketStatus::New,
        TicketStatus::WaitingCustomer,
        TicketStatus::WaitingInstaller,
        TicketStatus::WaitingTechSupport,
        TicketStatus::Closed,
        TicketStatus::Open,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::WaitingCustomer => "waiting_customer",
            TicketStatus::WaitingInstaller => "waiting_installer",
            TicketStatus::WaitingTechSupport => "waiting_tech_support",
            TicketStatus::Closed => "closed",
            TicketStatus::Open => "open",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TicketStatus::New => "Nouveau",
            TicketStatus::WaitingCustomer => "En attente du client",
            TicketStatus::WaitingInstaller => "En attente de l'installateur",
            TicketStatus::WaitingTechSupport => "En attente retour service technique",
            TicketStatus::Closed => "Fermé",
            TicketStatus::Open => "Ouvert",
        }
    }

    pub fn parse_label(value: &str) -> Result<Self, UnknownLabel> {
        match value.trim().to_lowercase().as_str() {
            "new" | "nouveau" => Ok(TicketStatus::New),
            "waiting_customer" | "en attente du client" => Ok(TicketStatus::WaitingCustomer),
            "waiting_installer" | "en attente de l'installateur" => Ok(TicketStatus::WaitingInstaller),
            "waiting_tech_support" | "en attente retour service technique" => {
                Ok(TicketStatus::WaitingTechSupport)
            }
            "closed" | "fermé" | "ferme" => Ok(TicketStatus::Closed),
            "open" | "ouvert" | "en cours" | "in_progress" => Ok(TicketStatus::Open),
            _ => Err(unknown("status", value)),
        }
    }
}

/// Case category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    #[default]
    TechnicalSupport,
    DebtCollection,
    InstallerComplaint,
    PaymentDetailsChange,
    EarlyTermination,
    ContractAddition,
}

impl TicketType {
    pub const ALL: &'static [TicketType] = &[
        TicketType::TechnicalSupport,
        TicketType::DebtCollection,
        TicketType::InstallerComplaint,
        TicketType::PaymentDetailsChange,
        TicketType::EarlyTermination,
        TicketType::ContractAddition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketType::TechnicalSupport => "technical_support",
            TicketType::DebtCollection => "debt_collection",
            TicketType::InstallerComplaint => "installer_complaint",
            TicketType::PaymentDetailsChange => "payment_details_change",
            TicketType::EarlyTermination => "early_termination",
            TicketType::ContractAddition => "contract_addition",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TicketType::TechnicalSupport => "SAV / question technique",
            TicketType::DebtCollection => "Recouvrement",
            TicketType::InstallerComplaint => "Plainte Installateur",
            TicketType::PaymentDetailsChange => "changement date prélèvement/RIB",
            TicketType::EarlyTermination => "Résiliation anticipée / cession de contrat",
            TicketType::ContractAddition => "Ajout contrat / Flexibilité",
        }
    }

    pub fn parse_label(value: &str) -> Result<Self, UnknownLabel> {
        match value.trim().to_lowercase().as_str() {
            "technical_support" | "sav / question technique" => Ok(TicketType::TechnicalSupport),
            "debt_collection" | "recouvrement" => Ok(TicketType::DebtCollection),
            "installer_complaint" | "plainte installateur" => Ok(TicketType::InstallerComplaint),
            "payment_details_change" | "changement date prélèvement/rib" => {
                Ok(TicketType::PaymentDetailsChange)
            }
            "early_termination" | "résiliation anticipée / cession de contrat" => {
                Ok(TicketType::EarlyTermination)
            }
            "contract_addition" | "ajout contrat / flexibilité" => Ok(TicketType::ContractAddition),
            _ => Err(unknown("type", value)),
        }
    }
}

/// Who raised the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Company,
    Subscriber,
    Installer,
}

impl Origin {
    pub const ALL: &'static [Origin] = &[Origin::Company, Origin::Subscriber, Origin::Installer];

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Company => "company",
            Origin::Subscriber => "subscriber",
            Origin::Installer => "installer",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Origin::Company => "SunLib",
            Origin::Subscriber => "Abonné",
            Origin::Installer => "Installateur",
        }
    }

    pub fn parse_label(value: &str) -> Result<Self, UnknownLabel> {
        match value.trim().to_lowercase().as_str() {
            "company" | "sunlib" => Ok(Origin::Company),
            "subscriber" | "abonné" | "abonne" => Ok(Origin::Subscriber),
            "installer" | "installateur" => Ok(Origin::Installer),
            _ => Err(unknown("origin", value)),
        }
    }
}

/// How the ticket reached the support team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ContactForm,
    Email,
    Phone,
    SubscriberPortal,
    MobileApp,
}

impl Channel {
    pub const ALL: &'static [Channel] = &[
        Channel::ContactForm,
        Channel::Email,
        Channel::Phone,
        Channel::SubscriberPortal,
        Channel::MobileApp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::ContactForm => "contact_form",
            Channel::Email => "email",
            Channel::Phone => "phone",
            Channel::SubscriberPortal => "subscriber_portal",
            Channel::MobileApp => "mobile_app",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::ContactForm => "Formulaire de contact",
            Channel::Email => "Mail",
            Channel::Phone => "Téléphone",
            Channel::SubscriberPortal => "Site abonné",
            Channel::MobileApp => "Application SunLib",
        }
    }

    pub fn parse_label(value: &str) -> Result<Self, UnknownLabel> {
        match value.trim().to_lowercase().as_str() {
            "contact_form" | "formulaire de contact" => Ok(Channel::ContactForm),
            "email" | "mail" | "e-mail" => Ok(Channel::Email),
            "phone" | "téléphone" | "telephone" => Ok(Channel::Phone),
            "subscriber_portal" | "site abonné" => Ok(Channel::SubscriberPortal),
            "mobile_app" | "application sunlib" => Ok(Channel::MobileApp),
            _ => Err(unknown("channel", value)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Tickets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub ticket_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub ticket_id: String,
    pub file_name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A support case as read from the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TicketStatus,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub origin: Origin,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
    /// Computed at read time from the joined subscriber, else the stored label.
    pub subscriber_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_id: Option<String>,
    /// Record id of the mirrored copy in the tabular store, once written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_record_id: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Who the ticket is about: a known replica subscriber or free text typed by
/// an agent in manual-entry mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum SubscriberRef {
    Known(String),
    Manual(String),
}

/// Input for ticket creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(rename = "type", default)]
    pub ticket_type: TicketType,
    pub origin: Origin,
    pub channel: Channel,
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub subscriber: SubscriberRef,
    #[serde(default)]
    pub installer_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Partial update applied by agents. `None` leaves a field untouched;
/// `assigned_to: Some(None)` unassigns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(rename = "type", default)]
    pub ticket_type: Option<TicketType>,
    #[serde(default)]
    pub assigned_to: Option<Option<String>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.ticket_type.is_none()
            && self.assigned_to.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.tabular.page_size, 100);
        assert_eq!(config.tabular.max_pages, 10);
        assert_eq!(config.tabular.timeout_secs, 30);
        assert_eq!(config.mirror.max_pages, 20);
        assert_eq!(config.subscribers.source, SubscriberSourceKind::Tabular);
        assert!(config.tabular.credentials().is_none());
        assert!(config.relational.database_path.is_none());
    }

    #[test]
    fn test_credentials_reject_blank_and_placeholders() {
        let mut tabular = TabularConfig {
            api_key: Some("   ".to_string()),
            base_id: Some("app123".to_string()),
            ..TabularConfig::default()
        };
        assert!(tabular.credentials().is_none());

        tabular.api_key = Some("votre_clé_api_airtable".to_string());
        assert!(tabular.credentials().is_none());

        tabular.api_key = Some(" key123 ".to_string());
        let creds = tabular.credentials().unwrap();
        assert_eq!(creds.api_key, "key123");
        assert_eq!(creds.base_id, "app123");
    }

    #[test]
    fn test_config_camel_case_sections() {
        let json = r#"{
            "tabular": { "apiKey": "k", "baseId": "b", "maxPages": 3 },
            "relational": { "databasePath": "/tmp/sundesk.db" },
            "subscribers": { "source": "replica", "autoSyncOnEmpty": true }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tabular.max_pages, 3);
        assert_eq!(config.tabular.subscribers_table, "Abonnés");
        assert_eq!(
            config.relational.database_path.as_deref(),
            Some("/tmp/sundesk.db")
        );
        assert_eq!(config.subscribers.source, SubscriberSourceKind::Replica);
        assert!(config.subscribers.auto_sync_on_empty);
    }

    #[test]
    fn test_priority_accepts_legacy_vocabularies() {
        assert_eq!(Priority::parse_label("Haute").unwrap(), Priority::High);
        assert_eq!(Priority::parse_label("high").unwrap(), Priority::High);
        assert_eq!(Priority::parse_label("MOYENNE").unwrap(), Priority::Medium);
        assert_eq!(Priority::parse_label("Normale").unwrap(), Priority::Medium);
        assert_eq!(Priority::parse_label("low").unwrap(), Priority::Low);
        assert!(Priority::parse_label("critical").is_err());
    }

    #[test]
    fn test_status_labels_and_canonical_names() {
        assert_eq!(TicketStatus::WaitingInstaller.as_str(), "waiting_installer");
        assert_eq!(
            TicketStatus::parse_label("En attente retour service technique").unwrap(),
            TicketStatus::WaitingTechSupport
        );
        assert_eq!(
            TicketStatus::parse_label("En cours").unwrap(),
            TicketStatus::Open
        );
        assert_eq!(TicketStatus::Closed.label(), "Fermé");
    }

    #[test]
    fn test_every_variant_round_trips_through_its_canonical_name() {
        for t in TicketType::ALL {
            assert!(!t.as_str().is_empty());
            assert_eq!(TicketType::parse_label(t.as_str()).unwrap(), *t);
            assert_eq!(TicketType::parse_label(t.label()).unwrap(), *t);
        }
        for c in Channel::ALL {
            assert_eq!(Channel::parse_label(c.as_str()).unwrap(), *c);
            assert_eq!(Channel::parse_label(c.label()).unwrap(), *c);
        }
        for o in Origin::ALL {
            assert_eq!(Origin::parse_label(o.as_str()).unwrap(), *o);
            assert_eq!(Origin::parse_label(o.label()).unwrap(), *o);
        }
        for p in Priority::ALL {
            assert_eq!(Priority::parse_label(p.label()).unwrap(), *p);
        }
        for s in TicketStatus::ALL {
            assert_eq!(TicketStatus::parse_label(s.as_str()).unwrap(), *s);
            assert_eq!(TicketStatus::parse_label(s.label()).unwrap(), *s);
        }
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Channel::SubscriberPortal).unwrap();
        assert_eq!(json, "\"subscriber_portal\"");
        assert_eq!(
            serde_json::to_string(&TicketStatus::WaitingTechSupport).unwrap(),
            "\"waiting_tech_support\""
        );
    }

    #[test]
    fn test_subscriber_display_identity() {
        let s = Subscriber {
            id: "rec1".to_string(),
            external_record_id: Some("rec1".to_string()),
            last_name: "Dupont".to_string(),
            first_name: "Jean".to_string(),
            contract_reference: "SL-000123".to_string(),
            company_name: None,
            installer_name: None,
            crm_link: None,
            email: None,
            phone: None,
        };
        assert_eq!(s.full_name(), "Jean Dupont");
        assert_eq!(s.display_identity(), "Jean Dupont - SL-000123");
    }
}
