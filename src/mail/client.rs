//! Mail provider REST client: list inbox messages, then fetch and parse the
//! first few in full.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{InboundEmail, MailError};
use crate::types::MailConfig;

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/";

const NO_SUBJECT: &str = "(no subject)";
const UNKNOWN_SENDER: &str = "Unknown sender";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct MailClient {
    http: reqwest::Client,
    base: String,
    access_token: String,
    max_results: u32,
    detail_limit: usize,
    timeout: Duration,
}

impl MailClient {
    pub fn new(access_token: String, config: &MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: DEFAULT_BASE_URL.to_string(),
            access_token,
            max_results: config.max_results.max(1),
            detail_limit: config.detail_limit,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    /// `None` when mail is disabled or no token is configured.
    pub fn from_config(config: &MailConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())?;
        Some(Self::new(token.to_string(), config))
    }

    /// Point the client at another API root (must end with `/`).
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base = base.to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T, MailError> {
        let request = self.http.get(url).bearer_auth(&self.access_token).query(query);
        let exchange = async {
            let resp = request.send().await?;
            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(MailError::AuthExpired);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                log::warn!("Mail API error {}: {}", status, body);
                return Err(MailError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
            Ok(resp.json::<T>().await?)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout(self.timeout.as_secs())),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, MailError> {
        Url::parse(&self.base)
            .and_then(|base| base.join(path))
            .map_err(|e| MailError::Api {
                status: 0,
                message: format!("invalid mail endpoint {path}: {e}"),
            })
    }

    /// List inbox messages and parse the first `detail_limit` of them.
    ///
    /// A message whose detail fetch fails is skipped, except for an expired
    /// token which aborts the whole listing.
    pub async fn list_inbox(&self) -> Result<Vec<InboundEmail>, MailError> {
        let list: MessageListResponse = self
            .get_json(
                self.endpoint("messages")?,
                &[
                    ("q", "in:inbox".to_string()),
                    ("maxResults", self.max_results.to_string()),
                ],
            )
            .await?;

        let mut emails = Vec::new();
        for stub in list.messages.iter().take(self.detail_limit) {
            match self.fetch_message(&stub.id).await {
                Ok(email) => emails.push(email),
                Err(MailError::AuthExpired) => return Err(MailError::AuthExpired),
                Err(e) => log::debug!("Skipping message {}: {}", stub.id, e),
            }
        }
        log::info!(
            "Mail: listed {} inbox messages, parsed {}",
            list.messages.len(),
            emails.len()
        );
        Ok(emails)
    }

    pub async fn fetch_message(&self, message_id: &str) -> Result<InboundEmail, MailError> {
        let url = self.endpoint(&format!("messages/{message_id}"))?;
        let detail: MessageDetail = self.get_json(url, &[("format", "full".to_string())]).await?;
        Ok(parse_message(detail))
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_message(detail: MessageDetail) -> InboundEmail {
    let payload = detail.payload.unwrap_or_default();
    let header = |name: &str| -> Option<String> {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let date = detail
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| {
            header("Date")
                .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                .map(|d| d.with_timezone(&Utc))
        })
        .unwrap_or_else(|| {
            log::debug!("Message {} has no usable date", detail.id);
            Utc::now()
        });

    InboundEmail {
        subject: header("Subject").unwrap_or_else(|| NO_SUBJECT.to_string()),
        from: header("From").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        body: extract_body(&payload).unwrap_or_default(),
        has_attachments: has_attachments(&payload),
        is_read: !detail.label_ids.iter().any(|l| l == "UNREAD"),
        id: detail.id,
        thread_id: detail.thread_id,
        snippet: detail.snippet,
        date,
    }
}

/// `text/plain` anywhere in the tree, then `text/html` converted to text,
/// then whatever the root part carries.
fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(text) = find_part_data(payload, "text/plain") {
        return Some(text);
    }
    if let Some(html) = find_part_data(payload, "text/html") {
        return match html2text::from_read(html.as_bytes(), 100) {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                log::debug!("HTML body conversion failed: {}", e);
                None
            }
        };
    }
    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .and_then(decode_url_safe_base64)
}

fn find_part_data(part: &MessagePart, mime: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime) {
        if let Some(text) = part
            .body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_url_safe_base64)
        {
            return Some(text);
        }
    }
    part.parts.iter().find_map(|p| find_part_data(p, mime))
}

fn has_attachments(part: &MessagePart) -> bool {
    let here = !part.filename.is_empty()
        || part
            .body
            .as_ref()
            .is_some_and(|b| b.attachment_id.is_some());
    here || part.parts.iter().any(has_attachments)
}

/// URL-safe base64 as the provider sends it; padding tolerated.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    use base64::Engine;
    let trimmed = data.trim_end_matches('=');
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            log::debug!("Undecodable body part: {}", e);
            None
        }
    }
}
