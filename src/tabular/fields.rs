//! Field-name normalization for subscriber records.
//!
//! Each logical field has an ordered list of raw key spellings seen across
//! schema revisions (accented, unaccented, snake_case, English). The first
//! key that is present with a non-empty value wins. Missing fields never fail:
//! names get a placeholder, the contract reference falls back to the record id,
//! everything else becomes `None`.

use serde_json::{Map, Value};

use super::RawRecord;
use crate::types::Subscriber;

pub const MISSING_LAST_NAME: &str = "Name missing";
pub const MISSING_FIRST_NAME: &str = "First name missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberField {
    LastName,
    FirstName,
    ContractReference,
    CompanyName,
    InstallerName,
    CrmLink,
    Email,
    Phone,
}

/// Ordered alias table. Order matters: earlier spellings win.
pub const FIELD_ALIASES: &[(SubscriberField, &[&str])] = &[
    (SubscriberField::LastName, &["Nom", "nom", "Last name", "last_name"]),
    (
        SubscriberField::FirstName,
        &["Prénom", "prenom", "Prenom", "First name", "first_name"],
    ),
    (
        SubscriberField::ContractReference,
        &["Contrat abonné", "contrat_abonne", "Contrat", "Contract"],
    ),
    (
        SubscriberField::CompanyName,
        &["Nom entreprise", "nom_entreprise", "Entreprise", "Company"],
    ),
    (
        SubscriberField::InstallerName,
        &["Installateur", "installateur", "Installer"],
    ),
    (SubscriberField::CrmLink, &["Lien CRM", "lien_crm", "CRM", "CRM link"]),
    (SubscriberField::Email, &["Email", "email", "E-mail"]),
    (
        SubscriberField::Phone,
        &["Téléphone", "telephone", "Tel", "Phone"],
    ),
];

impl SubscriberField {
    pub fn aliases(self) -> &'static [&'static str] {
        FIELD_ALIASES
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }
}

/// First alias present in `fields` with a non-empty textual value.
pub fn first_present(fields: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| fields.get(*key))
        .find_map(value_as_text)
}

/// Text view of a cell. Lookup/linked cells arrive as arrays, collaborator
/// cells as objects.
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(value_as_text),
        Value::Object(obj) => ["name", "email", "url"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(value_as_text),
        Value::Bool(_) | Value::Null => None,
    }
}

fn lookup(fields: &Map<String, Value>, field: SubscriberField) -> Option<String> {
    first_present(fields, field.aliases())
}

/// Build a `Subscriber` from a raw store record.
pub fn normalize_subscriber(record: &RawRecord) -> Subscriber {
    let f = &record.fields;
    Subscriber {
        id: record.id.clone(),
        external_record_id: Some(record.id.clone()),
        last_name: lookup(f, SubscriberField::LastName)
            .unwrap_or_else(|| MISSING_LAST_NAME.to_string()),
        first_name: lookup(f, SubscriberField::FirstName)
            .unwrap_or_else(|| MISSING_FIRST_NAME.to_string()),
        contract_reference: lookup(f, SubscriberField::ContractReference)
            .unwrap_or_else(|| record.id.clone()),
        company_name: lookup(f, SubscriberField::CompanyName),
        installer_name: lookup(f, SubscriberField::InstallerName),
        crm_link: lookup(f, SubscriberField::CrmLink),
        email: lookup(f, SubscriberField::Email),
        phone: lookup(f, SubscriberField::Phone),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, fields: Value) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            created_time: None,
        }
    }

    #[test]
    fn test_accented_spellings() {
        let rec = record(
            "rec1",
            json!({
                "Nom": "Dupont",
                "Prénom": "Jean",
                "Contrat abonné": "SL-000123",
                "Téléphone": "06 12 34 56 78",
                "Lien CRM": "https://crm.example.com/42"
            }),
        );
        let s = normalize_subscriber(&rec);
        assert_eq!(s.last_name, "Dupont");
        assert_eq!(s.first_name, "Jean");
        assert_eq!(s.contract_reference, "SL-000123");
        assert_eq!(s.phone.as_deref(), Some("06 12 34 56 78"));
        assert_eq!(s.crm_link.as_deref(), Some("https://crm.example.com/42"));
        assert_eq!(s.external_record_id.as_deref(), Some("rec1"));
    }

    #[test]
    fn test_snake_case_and_english_spellings() {
        let rec = record(
            "rec2",
            json!({
                "nom": "Martin",
                "prenom": "Marie",
                "contrat_abonne": "SL-000456",
                "E-mail": "marie.martin@gmail.com",
                "Phone": "0700000000",
                "Company": "Martin SARL"
            }),
        );
        let s = normalize_subscriber(&rec);
        assert_eq!(s.last_name, "Martin");
        assert_eq!(s.first_name, "Marie");
        assert_eq!(s.email.as_deref(), Some("marie.martin@gmail.com"));
        assert_eq!(s.company_name.as_deref(), Some("Martin SARL"));
    }

    #[test]
    fn test_earlier_alias_wins_and_empty_values_are_skipped() {
        let rec = record(
            "rec3",
            json!({ "Nom": "  ", "nom": "Bernard", "Last name": "Ignored" }),
        );
        assert_eq!(normalize_subscriber(&rec).last_name, "Bernard");
    }

    #[test]
    fn test_missing_fields_get_placeholders() {
        let rec = record("recXYZ", json!({}));
        let s = normalize_subscriber(&rec);
        assert_eq!(s.last_name, MISSING_LAST_NAME);
        assert_eq!(s.first_name, MISSING_FIRST_NAME);
        assert_eq!(s.contract_reference, "recXYZ");
        assert!(s.email.is_none());
        assert!(s.installer_name.is_none());
    }

    #[test]
    fn test_array_and_object_cells() {
        let rec = record(
            "rec4",
            json!({
                "Installateur": ["EcoSolar SARL", "Other"],
                "Contrat": 123456,
                "CRM": { "url": "https://crm.example.com/7" }
            }),
        );
        let s = normalize_subscriber(&rec);
        assert_eq!(s.installer_name.as_deref(), Some("EcoSolar SARL"));
        assert_eq!(s.contract_reference, "123456");
        assert_eq!(s.crm_link.as_deref(), Some("https://crm.example.com/7"));
    }

    #[test]
    fn test_every_field_has_aliases() {
        for (field, aliases) in FIELD_ALIASES {
            assert!(!aliases.is_empty(), "{:?} has no aliases", field);
            assert_eq!(field.aliases(), *aliases);
        }
    }
}
