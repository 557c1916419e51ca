//! Subscriber resolution from free text or an email sender.
//!
//! Order: exact email (case-insensitive) → bidirectional name substring in
//! either name order → nothing. Runs against an in-memory slice (the cache
//! snapshot), never the network, so it is cheap enough for per-keystroke use.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::tabular::fields::{MISSING_FIRST_NAME, MISSING_LAST_NAME};
use crate::types::Subscriber;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email regex")
    })
}

/// First email address found in `text`.
pub fn extract_email(text: &str) -> Option<String> {
    email_re().find(text).map(|m| m.as_str().to_string())
}

/// Case-fold, NFC-normalize and collapse whitespace.
fn fold(text: &str) -> String {
    text.nfc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// "jean.dupont_sav" → "jean dupont sav".
pub fn name_from_local_part(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    local
        .replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed `From:` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailSender {
    pub name: Option<String>,
    pub email: String,
}

impl EmailSender {
    /// Parse `"Jean Dupont" <jean@x.fr>`, `Jean Dupont <jean@x.fr>` or a bare
    /// address. `None` when no address is present.
    pub fn parse(from: &str) -> Option<Self> {
        let email = extract_email(from)?;
        let name = from
            .split('<')
            .next()
            .map(|n| n.trim().trim_matches('"').trim().to_string())
            .filter(|n| !n.is_empty() && !n.contains('@'));
        Some(Self { name, email })
    }

    /// The display name, or one derived from the address local part.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| name_from_local_part(&self.email))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    Email,
    Name,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub subscriber: Option<Subscriber>,
    pub matched_by: MatchedBy,
    /// Email extracted from the hint, if any.
    pub email: Option<String>,
    /// Identity to show: the subscriber's, or one synthesized from the hint.
    pub label: String,
}

pub struct SubscriberResolver<'a> {
    subscribers: &'a [Subscriber],
}

impl<'a> SubscriberResolver<'a> {
    pub fn new(subscribers: &'a [Subscriber]) -> Self {
        Self { subscribers }
    }

    fn by_email(&self, email: &str) -> Option<&'a Subscriber> {
        let wanted = email.trim();
        self.subscribers.iter().find(|s| {
            s.email
                .as_deref()
                .is_some_and(|e| e.trim().eq_ignore_ascii_case(wanted))
        })
    }

    fn by_name(&self, hint: &str) -> Option<&'a Subscriber> {
        let hint = fold(hint);
        if hint.is_empty() {
            return None;
        }
        self.subscribers.iter().find(|s| {
            let first = s.first_name.trim();
            let last = s.last_name.trim();
            if first.is_empty() || last.is_empty() || first == MISSING_FIRST_NAME || last == MISSING_LAST_NAME {
                return false;
            }
            [format!("{first} {last}"), format!("{last} {first}")]
                .iter()
                .map(|n| fold(n))
                .any(|name| hint.contains(&name) || name.contains(&hint))
        })
    }

    /// Resolve free text (a typed name, an address, or a whole `From:` value).
    pub fn resolve(&self, hint: &str) -> Resolution {
        let email = extract_email(hint);

        if let Some(found) = email.as_deref().and_then(|e| self.by_email(e)) {
            return Resolution {
                label: found.display_identity(),
                subscriber: Some(found.clone()),
                matched_by: MatchedBy::Email,
                email,
            };
        }

        // Match names against the text without the address, plus the
        // address local part turned into words
        let mut name_hint = match &email {
            Some(e) => hint.replace(e.as_str(), " ").replace(['<', '>', '"'], " "),
            None => hint.to_string(),
        };
        if name_hint.trim().is_empty() {
            if let Some(e) = &email {
                name_hint = name_from_local_part(e);
            }
        }

        if let Some(found) = self.by_name(&name_hint) {
            return Resolution {
                label: found.display_identity(),
                subscriber: Some(found.clone()),
                matched_by: MatchedBy::Name,
                email,
            };
        }

        Resolution {
            label: fallback_label(hint, email.as_deref()),
            subscriber: None,
            matched_by: MatchedBy::None,
            email,
        }
    }

    /// Resolve an inbound email sender: address first, then display name,
    /// then the address local part.
    pub fn resolve_sender(&self, sender: &EmailSender) -> Resolution {
        if let Some(found) = self.by_email(&sender.email) {
            return Resolution {
                label: found.display_identity(),
                subscriber: Some(found.clone()),
                matched_by: MatchedBy::Email,
                email: Some(sender.email.clone()),
            };
        }

        let by_name = sender
            .name
            .as_deref()
            .and_then(|n| self.by_name(n))
            .or_else(|| self.by_name(&name_from_local_part(&sender.email)));
        if let Some(found) = by_name {
            return Resolution {
                label: found.display_identity(),
                subscriber: Some(found.clone()),
                matched_by: MatchedBy::Name,
                email: Some(sender.email.clone()),
            };
        }

        Resolution {
            label: fallback_label(&sender.display_name(), Some(&sender.email)),
            subscriber: None,
            matched_by: MatchedBy::None,
            email: Some(sender.email.clone()),
        }
    }

    /// Picker search: case-insensitive substring over name (either order),
    /// contract reference, email and company. An empty query keeps everything.
    pub fn filter(&self, query: &str) -> Vec<&'a Subscriber> {
        let q = fold(query);
        if q.is_empty() {
            return self.subscribers.iter().collect();
        }
        self.subscribers
            .iter()
            .filter(|s| {
                let haystacks = [
                    Some(format!("{} {}", s.first_name, s.last_name)),
                    Some(format!("{} {}", s.last_name, s.first_name)),
                    Some(s.contract_reference.clone()),
                    s.email.clone(),
                    s.company_name.clone(),
                ];
                haystacks
                    .iter()
                    .flatten()
                    .any(|h| fold(h).contains(&q))
            })
            .collect()
    }
}

/// "hint <email>" unless the hint already is (or contains) the address.
fn fallback_label(hint: &str, email: Option<&str>) -> String {
    let hint = hint.split_whitespace().collect::<Vec<_>>().join(" ");
    match email {
        Some(e) if !hint.to_lowercase().contains(&e.to_lowercase()) => {
            if hint.is_empty() {
                e.to_string()
            } else {
                format!("{hint} <{e}>")
            }
        }
        _ => hint,
    }
}
