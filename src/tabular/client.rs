//! HTTP client for the tabular store REST API.
//!
//! Uses reqwest with Bearer token auth. Requests target
//! `{base_url}/{base_id}/{table}`; listings follow the `offset` cursor until
//! the store stops returning one or the page ceiling is reached.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::fields::normalize_subscriber;
use super::{
    ExternalRecord, RawRecord, SubscriberListing, TabularError, TabularSource, TicketRecordFields,
};
use crate::types::{Subscriber, TabularConfig, TabularCredentials};

/// One page of a cursor-paginated listing.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Everything collected by `collect_pages`.
#[derive(Debug)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub pages: u32,
    pub truncated: bool,
}

/// Follow a cursor until it runs out or `max_pages` pages have been fetched.
///
/// Hitting the ceiling is not an error: the partial listing is returned with
/// `truncated` set and a warning is logged. A failing page aborts the listing.
pub async fn collect_pages<T, F, Fut>(max_pages: u32, mut fetch: F) -> Result<Listing<T>, TabularError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, TabularError>>,
{
    let max_pages = max_pages.max(1);
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = fetch(cursor.take()).await?;
        pages += 1;
        items.extend(page.items);

        match page.next.filter(|c| !c.is_empty()) {
            None => break,
            Some(next) if pages >= max_pages => {
                log::warn!(
                    "Tabular listing stopped at page ceiling ({} pages, {} records, cursor {} pending)",
                    pages,
                    items.len(),
                    next
                );
                return Ok(Listing {
                    items,
                    pages,
                    truncated: true,
                });
            }
            Some(next) => cursor = Some(next),
        }
    }

    Ok(Listing {
        items,
        pages,
        truncated: false,
    })
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Clone)]
pub struct TabularStoreClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    subscribers_table: String,
    tickets_table: String,
    page_size: u32,
    max_pages: u32,
    timeout: Duration,
}

impl TabularStoreClient {
    pub fn new(credentials: TabularCredentials, config: &TabularConfig) -> Result<Self, TabularError> {
        let mut base = Url::parse(&config.base_url).map_err(|e| {
            TabularError::InvalidConfig(format!("base URL {}: {}", config.base_url, e))
        })?;
        base.path_segments_mut()
            .map_err(|_| {
                TabularError::InvalidConfig(format!("base URL cannot be a base: {}", config.base_url))
            })?
            .pop_if_empty()
            .push(&credentials.base_id);

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: credentials.api_key,
            subscribers_table: config.subscribers_table.clone(),
            tickets_table: config.tickets_table.clone(),
            page_size: config.page_size.clamp(1, 100),
            max_pages: config.max_pages.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    /// Build a client from config, or `ConfigurationMissing` when the
    /// credentials are absent or placeholders.
    pub fn from_config(config: &TabularConfig) -> Result<Self, TabularError> {
        let credentials = config
            .credentials()
            .ok_or(TabularError::ConfigurationMissing)?;
        Self::new(credentials, config)
    }

    /// Same connection with a different page ceiling (the mirror lists deeper
    /// than the picker).
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    fn table_url(&self, table: &str, record_id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(table);
            if let Some(id) = record_id {
                segments.push(id);
            }
        }
        url
    }

    /// Send with auth and the client-side timeout covering the whole exchange
    /// (headers and body).
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TabularError> {
        let request = request.bearer_auth(&self.api_key);
        let exchange = async {
            let resp = request.send().await.map_err(map_reqwest_error)?;
            let resp = check_status(resp).await?;
            let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
            serde_json::from_slice::<T>(&bytes).map_err(|e| TabularError::Decode(e.to_string()))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TabularError::Timeout(self.timeout.as_secs())),
        }
    }

    /// Fetch one page of the subscribers table.
    pub async fn fetch_subscriber_page(&self, offset: Option<String>) -> Result<Page<RawRecord>, TabularError> {
        let url = self.table_url(&self.subscribers_table, None);
        let mut query = vec![("pageSize", self.page_size.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset));
        }
        let resp: ListResponse = self.send_json(self.http.get(url).query(&query)).await?;
        Ok(Page {
            items: resp.records,
            next: resp.offset,
        })
    }

    /// All subscriber records up to the page ceiling.
    pub async fn list_subscriber_records(&self) -> Result<Listing<RawRecord>, TabularError> {
        let listing = collect_pages(self.max_pages, |offset| self.fetch_subscriber_page(offset)).await?;
        log::info!(
            "Tabular: fetched {} subscriber records in {} pages",
            listing.items.len(),
            listing.pages
        );
        Ok(listing)
    }

    /// Normalized subscribers, truncation flag dropped.
    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>, TabularError> {
        Ok(self.fetch_subscribers().await?.subscribers)
    }
}

#[async_trait::async_trait]
impl TabularSource for TabularStoreClient {
    async fn fetch_subscribers(&self) -> Result<SubscriberListing, TabularError> {
        let listing = self.list_subscriber_records().await?;
        Ok(SubscriberListing {
            subscribers: listing.items.iter().map(normalize_subscriber).collect(),
            truncated: listing.truncated,
        })
    }

    async fn create_ticket_record(
        &self,
        fields: &TicketRecordFields,
    ) -> Result<ExternalRecord, TabularError> {
        let url = self.table_url(&self.tickets_table, None);
        let body = fields.create_body(Utc::now());
        self.send_json(self.http.post(url).json(&body)).await
    }

    async fn update_ticket_record(
        &self,
        record_id: &str,
        fields: &TicketRecordFields,
    ) -> Result<ExternalRecord, TabularError> {
        let url = self.table_url(&self.tickets_table, Some(record_id));
        let body = fields.update_body(Utc::now());
        self.send_json(self.http.patch(url).json(&body)).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TabularError {
    if err.is_decode() {
        TabularError::Decode(err.to_string())
    } else {
        TabularError::Network(err.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, TabularError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    log::warn!("Tabular store API error {}: {}", status, body);
    Err(TabularError::Upstream {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("").to_string(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn numbered(range: std::ops::Range<usize>) -> Vec<usize> {
        range.collect()
    }

    #[tokio::test]
    async fn test_collect_pages_follows_cursor_until_exhausted() {
        let all = numbered(0..250);
        let calls = AtomicU32::new(0);
        let listing = collect_pages(10, |cursor| {
            calls.fetch_add(1, Ordering::SeqCst);
            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + 100).min(all.len());
            let next = (end < all.len()).then(|| end.to_string());
            let items = all[start..end].to_vec();
            async move { Ok(Page { items, next }) }
        })
        .await
        .unwrap();

        assert_eq!(listing.items.len(), 250);
        assert_eq!(listing.pages, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!listing.truncated);
    }

    #[tokio::test]
    async fn test_collect_pages_stops_at_ceiling() {
        let calls = AtomicU32::new(0);
        let listing = collect_pages(10, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(Page {
                    items: vec![n],
                    next: Some("again".to_string()),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(listing.items.len(), 10);
        assert!(listing.truncated);
    }

    #[tokio::test]
    async fn test_collect_pages_exact_ceiling_is_not_truncated() {
        let calls = AtomicU32::new(0);
        let listing = collect_pages(2, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(Page {
                    items: vec![n],
                    next: (n == 0).then(|| "p2".to_string()),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(listing.pages, 2);
        assert!(!listing.truncated);
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_page_failure() {
        let result: Result<Listing<u32>, _> = collect_pages(10, |cursor| async move {
            match cursor {
                None => Ok(Page {
                    items: vec![1],
                    next: Some("p2".to_string()),
                }),
                Some(_) => Err(TabularError::Network("connection reset".to_string())),
            }
        })
        .await;
        assert!(matches!(result, Err(TabularError::Network(_))));
    }

    #[test]
    fn test_from_config_without_credentials() {
        let result = TabularStoreClient::from_config(&TabularConfig::default());
        assert!(matches!(result, Err(TabularError::ConfigurationMissing)));
    }

    #[test]
    fn test_unparseable_base_url_is_a_config_error() {
        for base_url in ["not a url", "mailto:ops@sunlib.fr"] {
            let config = TabularConfig {
                api_key: Some("key".to_string()),
                base_id: Some("appBase".to_string()),
                base_url: base_url.to_string(),
                ..TabularConfig::default()
            };
            match TabularStoreClient::from_config(&config) {
                Err(TabularError::InvalidConfig(msg)) => assert!(msg.contains(base_url)),
                Err(other) => panic!("expected InvalidConfig for {base_url}, got {other}"),
                Ok(_) => panic!("expected InvalidConfig for {base_url}"),
            }
        }
    }

    #[test]
    fn test_table_url_encodes_segments() {
        let config = TabularConfig {
            api_key: Some("key".to_string()),
            base_id: Some("appBase".to_string()),
            ..TabularConfig::default()
        };
        let client = TabularStoreClient::from_config(&config).unwrap();
        let url = client.table_url("Abonnés", None);
        assert_eq!(url.as_str(), "https://api.airtable.com/v0/appBase/Abonn%C3%A9s");
        let url = client.table_url("Tickets", Some("rec1"));
        assert_eq!(url.path(), "/v0/appBase/Tickets/rec1");
    }

    // -- Against a local server ---------------------------------------------

    #[derive(Clone)]
    struct Fake {
        total: usize,
        hits: Arc<AtomicU32>,
    }

    async fn list_handler(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        fake.hits.fetch_add(1, Ordering::SeqCst);
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer key123") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let size: usize = params.get("pageSize").and_then(|s| s.parse().ok()).unwrap_or(100);
        let start: usize = params.get("offset").and_then(|s| s.parse().ok()).unwrap_or(0);
        let end = (start + size).min(fake.total);
        let records: Vec<Value> = (start..end)
            .map(|i| json!({ "id": format!("rec{i}"), "fields": { "Nom": format!("Nom{i}"), "Prénom": "Jean" } }))
            .collect();
        let mut body = json!({ "records": records });
        if end < fake.total {
            body["offset"] = json!(end.to_string());
        }
        Ok(Json(body))
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v0")
    }

    fn client_for(base_url: String) -> TabularStoreClient {
        let config = TabularConfig {
            api_key: Some("key123".to_string()),
            base_id: Some("appTest".to_string()),
            base_url,
            subscribers_table: "Subscribers".to_string(),
            ..TabularConfig::default()
        };
        TabularStoreClient::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_lists_all_pages_from_server() {
        let fake = Fake {
            total: 250,
            hits: Arc::new(AtomicU32::new(0)),
        };
        let router = Router::new()
            .route("/v0/appTest/Subscribers", get(list_handler))
            .with_state(fake.clone());
        let client = client_for(serve(router).await);

        let listing = client.fetch_subscribers().await.unwrap();
        assert_eq!(listing.subscribers.len(), 250);
        assert!(!listing.truncated);
        assert_eq!(fake.hits.load(Ordering::SeqCst), 3);
        assert_eq!(listing.subscribers[0].last_name, "Nom0");
        assert_eq!(listing.subscribers[0].contract_reference, "rec0");
    }

    #[tokio::test]
    async fn test_page_ceiling_against_server() {
        let fake = Fake {
            total: 5_000,
            hits: Arc::new(AtomicU32::new(0)),
        };
        let router = Router::new()
            .route("/v0/appTest/Subscribers", get(list_handler))
            .with_state(fake.clone());
        let client = client_for(serve(router).await).with_max_pages(3);

        let listing = client.fetch_subscribers().await.unwrap();
        assert_eq!(listing.subscribers.len(), 300);
        assert!(listing.truncated);
        assert_eq!(fake.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_success_maps_to_upstream() {
        let router = Router::new().route(
            "/v0/appTest/Subscribers",
            get(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    r#"{"error":{"type":"INVALID_REQUEST"}}"#,
                )
            }),
        );
        let client = client_for(serve(router).await);

        match client.list_subscribers().await {
            Err(TabularError::Upstream {
                status,
                reason,
                body,
            }) => {
                assert_eq!(status, 422);
                assert_eq!(reason, "Unprocessable Entity");
                assert!(body.contains("INVALID_REQUEST"));
            }
            other => panic!("expected upstream error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let router = Router::new().route(
            "/v0/appTest/Subscribers",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "records": [] }))
            }),
        );
        let client = client_for(serve(router).await).with_timeout(Duration::from_millis(100));

        let result = client.list_subscribers().await;
        assert!(matches!(result, Err(TabularError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let router = Router::new().route("/v0/appTest/Subscribers", get(|| async { "not json" }));
        let client = client_for(serve(router).await);
        let result = client.list_subscribers().await;
        assert!(matches!(result, Err(TabularError::Decode(_))));
    }

    #[tokio::test]
    async fn test_create_ticket_record_posts_fields() {
        use axum::routing::post;
        let router = Router::new().route(
            "/v0/appTest/Tickets",
            post(|Json(body): Json<Value>| async move {
                let title = body["fields"]["Titre"].clone();
                Json(json!({ "id": "recT1", "fields": { "Titre": title } }))
            }),
        );
        let client = client_for(serve(router).await);
        let fields = TicketRecordFields {
            title: "Onduleur en panne".to_string(),
            description: "Voyant rouge".to_string(),
            status: crate::types::TicketStatus::New,
            priority: crate::types::Priority::High,
            client: "Jean Dupont - SL-000123".to_string(),
            client_email: None,
        };
        let record = client.create_ticket_record(&fields).await.unwrap();
        assert_eq!(record.id, "recT1");
        assert_eq!(record.fields["Titre"], "Onduleur en panne");
    }
}
