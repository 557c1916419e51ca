use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::cache::{ReplicaSubscriberSource, SubscriberCache, SubscriberSource, TabularSubscriberSource};
use crate::db::{SharedDb, SupportDb};
use crate::error::SupportError;
use crate::gateway::TicketMutationGateway;
use crate::mail::{MailClient, TicketDraft};
use crate::mirror::{RelationalMirror, SyncStats};
use crate::resolver::SubscriberResolver;
use crate::server::{MirrorRunner, TriggerState};
use crate::tabular::{TabularError, TabularSource, TabularStoreClient};
use crate::types::{Config, SubscriberSourceKind};

/// Every service, built once at startup and shared by reference.
pub struct AppState {
    pub config: RwLock<Config>,
    pub db: SharedDb,
    pub tabular: Option<Arc<dyn TabularSource>>,
    pub mirror: Option<Arc<RelationalMirror>>,
    pub subscribers: Arc<SubscriberCache>,
    pub gateway: TicketMutationGateway,
    pub mail: Option<MailClient>,
    /// Wakes the mirror poller for an immediate run.
    pub mirror_wake: Notify,
}

impl AppState {
    /// Open the relational store and build every client from `config`.
    ///
    /// A missing database path is fatal. Missing tabular credentials are
    /// not: the console runs in manual-entry mode.
    pub fn initialize(config: Config) -> Result<Self, SupportError> {
        let configured = config
            .relational
            .database_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SupportError::ConfigurationMissing("relational.databasePath".to_string()))?;
        let path = SupportDb::resolve_path(configured)?;
        let db = SupportDb::open_at(&path)?.into_shared();

        let (tabular, mirror_source) = match TabularStoreClient::from_config(&config.tabular) {
            Ok(client) => {
                let mirror_client = client.clone().with_max_pages(config.mirror.max_pages);
                let tabular: Arc<dyn TabularSource> = Arc::new(client);
                let mirror_source: Arc<dyn TabularSource> = Arc::new(mirror_client);
                (Some(tabular), Some(mirror_source))
            }
            Err(TabularError::ConfigurationMissing) => {
                log::info!("Tabular store not configured, subscriber forms use manual entry");
                (None, None)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::assemble(config, db, tabular, mirror_source))
    }

    /// Wire services around an already-open store.
    pub fn assemble(
        config: Config,
        db: SharedDb,
        tabular: Option<Arc<dyn TabularSource>>,
        mirror_source: Option<Arc<dyn TabularSource>>,
    ) -> Self {
        let mirror = mirror_source.map(|source| {
            let replica = Arc::new(db.clone());
            Arc::new(RelationalMirror::new(source, replica))
        });

        let source: Option<Arc<dyn SubscriberSource>> = match config.subscribers.source {
            SubscriberSourceKind::Tabular => tabular
                .clone()
                .map(|t| Arc::new(TabularSubscriberSource::new(t)) as Arc<dyn SubscriberSource>),
            SubscriberSourceKind::Replica => {
                let auto_sync = mirror.clone().filter(|_| config.subscribers.auto_sync_on_empty);
                Some(Arc::new(ReplicaSubscriberSource::new(db.clone(), auto_sync)) as Arc<dyn SubscriberSource>)
            }
        };
        let subscribers = Arc::new(SubscriberCache::new(source));

        let gateway = TicketMutationGateway::new(db.clone(), tabular.clone(), Some(subscribers.clone()));
        let mail = MailClient::from_config(&config.mail);

        log::info!(
            "Services initialized (tabular: {}, mirror: {}, mail: {}, subscriber source: {:?})",
            tabular.is_some(),
            mirror.is_some(),
            mail.is_some(),
            config.subscribers.source
        );

        Self {
            config: RwLock::new(config),
            db,
            tabular,
            mirror,
            subscribers,
            gateway,
            mail,
            mirror_wake: Notify::new(),
        }
    }

    /// Ask the poller for a mirror run now instead of at the next interval.
    pub fn request_mirror_run(&self) {
        self.mirror_wake.notify_one();
    }

    /// One mirror pass. A replica-backed cache is refreshed afterwards so
    /// pickers see the new rows.
    pub async fn run_mirror(&self) -> Result<SyncStats, SupportError> {
        let Some(mirror) = &self.mirror else {
            return Err(SupportError::ConfigurationMissing(
                "tabular store API key or base id".to_string(),
            ));
        };
        let stats = mirror.sync().await?;

        let replica_backed = self.config.read().subscribers.source == SubscriberSourceKind::Replica;
        if replica_backed {
            self.subscribers.reload().await;
        }
        Ok(stats)
    }

    pub fn trigger_state(self: &Arc<Self>) -> TriggerState {
        TriggerState {
            token: self.config.read().mirror.trigger_token.clone(),
            runner: self.clone(),
        }
    }

    /// Ticket drafts for the current inbox, subscribers resolved against the
    /// cached list.
    pub async fn inbox_drafts(&self) -> Result<Vec<TicketDraft>, SupportError> {
        let Some(mail) = &self.mail else {
            return Err(SupportError::ConfigurationMissing("mail access token".to_string()));
        };
        let emails = mail.list_inbox().await?;
        let entry = self.subscribers.ensure_loaded().await;
        let resolver = SubscriberResolver::new(&entry.subscribers);
        Ok(emails
            .iter()
            .map(|email| TicketDraft::from_email(email, &resolver))
            .collect())
    }
}

#[async_trait]
impl MirrorRunner for AppState {
    async fn run_mirror(&self) -> Result<SyncStats, SupportError> {
        AppState::run_mirror(self).await
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// `$SUNDESK_CONFIG`, else `~/.sundesk/config.json`.
pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("SUNDESK_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".sundesk").join("config.json"))
}

/// Load the config file (defaults when absent), then apply environment
/// overrides.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    let mut config = load_config_file(&path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Secrets and the database path may come from the environment instead of
/// the file. Blank values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("SUNDESK_TABULAR_API_KEY") {
        log::info!("Tabular API key from environment ({} chars)", v.len());
        config.tabular.api_key = Some(v);
    }
    if let Some(v) = get("SUNDESK_TABULAR_BASE_ID") {
        config.tabular.base_id = Some(v);
    }
    if let Some(v) = get("SUNDESK_DATABASE_PATH") {
        config.relational.database_path = Some(v);
    }
    if let Some(v) = get("SUNDESK_TRIGGER_TOKEN") {
        config.mirror.trigger_token = Some(v);
    }
    if let Some(v) = get("SUNDESK_MAIL_ACCESS_TOKEN") {
        config.mail.access_token = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::mirror::tests::{sub, FakeSource};
    use std::collections::HashMap;

    fn config_with_db(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.relational.database_path = Some(dir.path().join("sundesk.db").display().to_string());
        config
    }

    #[test]
    fn test_missing_database_path_is_fatal() {
        match AppState::initialize(Config::default()) {
            Err(e) => assert!(e.is_configuration_missing()),
            Ok(_) => panic!("initialize must fail without a database path"),
        }
    }

    #[tokio::test]
    async fn test_without_tabular_credentials_forms_use_manual_entry() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::initialize(config_with_db(&dir)).unwrap();
        assert!(state.tabular.is_none());
        assert!(state.mirror.is_none());

        let entry = state.subscribers.ensure_loaded().await;
        assert!(entry.manual_entry);
        assert!(entry.error.is_none());

        let err = state.run_mirror().await.unwrap_err();
        assert!(err.is_configuration_missing());
    }

    #[test]
    fn test_bad_tabular_base_url_fails_initialize_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_db(&dir);
        config.tabular.api_key = Some("key".to_string());
        config.tabular.base_id = Some("appBase".to_string());
        config.tabular.base_url = "not a url".to_string();
        match AppState::initialize(config) {
            Err(SupportError::InvalidConfiguration(msg)) => assert!(msg.contains("not a url")),
            Err(other) => panic!("expected InvalidConfiguration, got {other}"),
            Ok(_) => panic!("initialize must reject an unparseable base URL"),
        }
    }

    #[tokio::test]
    async fn test_run_mirror_refreshes_replica_backed_cache() {
        let mut config = Config::default();
        config.subscribers.source = SubscriberSourceKind::Replica;
        let source = FakeSource::with(vec![sub("recA", "Dupont")]);
        let tabular: Arc<dyn TabularSource> = source.clone();
        let state = AppState::assemble(
            config,
            test_db().into_shared(),
            Some(tabular.clone()),
            Some(tabular),
        );

        assert!(state.subscribers.ensure_loaded().await.subscribers.is_empty());

        source.set(vec![sub("recA", "Dupont"), sub("recB", "Martin")], false);
        let stats = state.run_mirror().await.unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(state.subscribers.snapshot().subscribers.len(), 2);
    }

    #[tokio::test]
    async fn test_inbox_drafts_resolve_senders_against_cache() {
        use crate::mirror::SubscriberReplica;
        use crate::resolver::MatchedBy;
        use crate::types::{MailConfig, Priority, SubscriberRef, TicketType};
        use axum::extract::Path;
        use axum::routing::get;
        use axum::{Json, Router};
        use serde_json::json;

        let router = Router::new()
            .route(
                "/me/messages",
                get(|| async { Json(json!({ "messages": [{"id": "m1"}, {"id": "m2"}] })) }),
            )
            .route(
                "/me/messages/:id",
                get(|Path(id): Path<String>| async move {
                    let (from, subject, snippet) = if id == "m1" {
                        ("Jean Dupont <jean.dupont@email.com>", "Panne onduleur", "Plus de production")
                    } else {
                        ("marie.curie@inconnu.fr", "Changement de RIB", "Bonjour, contrat: sl-000777")
                    };
                    Json(json!({
                        "id": id,
                        "internalDate": "1772442000000",
                        "snippet": snippet,
                        "payload": {"headers": [
                            {"name": "From", "value": from},
                            {"name": "Subject", "value": subject}
                        ]}
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut config = Config::default();
        config.subscribers.source = SubscriberSourceKind::Replica;
        let db = test_db().into_shared();
        let mut dupont = sub("recA", "Dupont");
        dupont.email = Some("jean.dupont@email.com".to_string());
        db.insert_batch(&[dupont]).unwrap();

        let mut state = AppState::assemble(config, db, None, None);
        assert!(state.inbox_drafts().await.unwrap_err().is_configuration_missing());

        let base = url::Url::parse(&format!("http://{addr}/me/")).unwrap();
        state.mail = Some(MailClient::new("tok".to_string(), &MailConfig::default()).with_base_url(base));

        let drafts = state.inbox_drafts().await.unwrap();
        assert_eq!(drafts.len(), 2);

        assert_eq!(drafts[0].source_email_id, "m1");
        assert_eq!(drafts[0].matched_by, MatchedBy::Email);
        assert!(matches!(drafts[0].subscriber, SubscriberRef::Known(_)));
        assert_eq!(drafts[0].subscriber_label, "Jean Dupont - SL-recA");
        assert_eq!(drafts[0].priority, Priority::High);

        assert_eq!(drafts[1].matched_by, MatchedBy::None);
        assert!(matches!(drafts[1].subscriber, SubscriberRef::Manual(_)));
        assert!(drafts[1].subscriber_label.ends_with(" - SL-000777"));
        assert_eq!(drafts[1].ticket_type, TicketType::PaymentDetailsChange);
        assert_eq!(drafts[1].contract_reference.as_deref(), Some("SL-000777"));
    }

    #[test]
    fn test_load_config_file_missing_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.tabular.page_size, 100);
        assert!(config.relational.database_path.is_none());
    }

    #[test]
    fn test_load_config_file_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_file(&path).unwrap_err().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let mut config = Config::default();
        config.tabular.api_key = Some("from-file".to_string());
        let env: HashMap<&str, &str> = HashMap::from([
            ("SUNDESK_TABULAR_API_KEY", "from-env"),
            ("SUNDESK_DATABASE_PATH", "/tmp/sundesk.db"),
            ("SUNDESK_TRIGGER_TOKEN", "   "),
        ]);
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.tabular.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.relational.database_path.as_deref(), Some("/tmp/sundesk.db"));
        assert!(config.mirror.trigger_token.is_none());
    }
}
