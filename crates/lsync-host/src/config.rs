use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::mac::MacSecret;
use crate::reconcile::MergeStrategy;
use crate::retry::RetryPolicy;

/// The closed set of collections a webhook may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Agenda,
    Alerts,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Agenda, CollectionKind::Alerts];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Agenda => "agenda",
            CollectionKind::Alerts => "alerts",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            CollectionKind::Agenda => "AGENDA",
            CollectionKind::Alerts => "ALERTS",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agenda" => Ok(CollectionKind::Agenda),
            "alerts" => Ok(CollectionKind::Alerts),
            other => Err(SyncError::validation(format!(
                "unknown webhook type '{other}' (expected one of: agenda, alerts)"
            ))),
        }
    }
}

/// Per-collection settings for verification and merging.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub kind: CollectionKind,
    /// Shared secret used to verify inbound notifications.
    pub secret: MacSecret,
    /// Stable identifier field; when set, records merge by identifier instead of position.
    pub id_field: Option<String>,
}

impl CollectionConfig {
    pub fn new(kind: CollectionKind, secret: MacSecret) -> Self {
        Self {
            kind,
            secret,
            id_field: None,
        }
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        match &self.id_field {
            Some(field) => MergeStrategy::Keyed(field.clone()),
            None => MergeStrategy::Positional,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub http_server: HttpServerConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    /// Collections with a configured secret. Known collections missing here are rejected.
    pub collections: BTreeMap<CollectionKind, CollectionConfig>,
    pub table: TableStoreConfig,
    pub ledger: LedgerStoreConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            http_server: HttpServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            collections: BTreeMap::new(),
            table: TableStoreConfig::default(),
            ledger: LedgerStoreConfig::default(),
        }
    }
}

impl HostConfig {
    /// Build HostConfig from process environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build HostConfig from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let mut cfg = HostConfig::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(bind) = get("LSYNC_BIND") {
            cfg.http_server.bind = bind
                .parse()
                .map_err(|e| SyncError::config(format!("LSYNC_BIND '{bind}': {e}")))?;
        }
        if let Some(ms) = parse_u64(&get, "LSYNC_COALESCE_DELAY_MS")? {
            cfg.scheduler.coalesce_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_u64(&get, "LSYNC_RETRY_MAX_ATTEMPTS")? {
            if n == 0 {
                return Err(SyncError::config("LSYNC_RETRY_MAX_ATTEMPTS must be at least 1"));
            }
            cfg.retry.max_attempts = n as usize;
        }
        if let Some(ms) = parse_u64(&get, "LSYNC_RETRY_BASE_DELAY_MS")? {
            cfg.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&get, "LSYNC_RETRY_MAX_DELAY_MS")? {
            cfg.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse_bool(&get, "LSYNC_RETRY_JITTER")? {
            cfg.retry.jitter = jitter;
        }

        for kind in CollectionKind::ALL {
            let prefix = kind.env_prefix();
            let Some(raw) = get(&format!("{prefix}_MAC_SECRET_BASE64")) else {
                continue;
            };
            let secret = MacSecret::from_base64(&raw)?;
            let mut collection = CollectionConfig::new(kind, secret);
            collection.id_field = get(&format!("{prefix}_ID_FIELD"));
            cfg.collections.insert(kind, collection);
        }

        if let Some(url) = get("TABLE_API_URL") {
            cfg.table.api_url = url;
        }
        cfg.table.access_token = get("TABLE_ACCESS_TOKEN");
        cfg.table.base_id = get("TABLE_BASE_ID");

        cfg.ledger.gateway_url = get("LEDGER_GATEWAY_URL");
        cfg.ledger.contract_id = get("LEDGER_CONTRACT_ID");
        if let Some(n) = parse_u64(&get, "LEDGER_POLL_ATTEMPTS")? {
            cfg.ledger.poll_attempts = n as u32;
        }
        if let Some(ms) = parse_u64(&get, "LEDGER_POLL_INTERVAL_MS")? {
            cfg.ledger.poll_interval = Duration::from_millis(ms);
        }

        Ok(cfg)
    }

    pub fn collection(&self, kind: CollectionKind) -> Option<&CollectionConfig> {
        self.collections.get(&kind)
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, SyncError> {
    get(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|e| SyncError::config(format!("{key} '{raw}': {e}")))
        })
        .transpose()
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, SyncError> {
    get(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SyncError::config(format!("{key} '{raw}': expected a boolean"))),
        })
        .transpose()
}

/// Configuration for the inbound HTTP server.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wait between notification receipt and reconciliation start.
    pub coalesce_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            coalesce_delay: Duration::from_millis(2000),
        }
    }
}

/// Where a collection lives in the table store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSource {
    pub table: String,
    pub view: String,
}

impl TableSource {
    pub fn new(table: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            view: view.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableStoreConfig {
    pub api_url: String,
    pub access_token: Option<String>,
    pub base_id: Option<String>,
    pub timeout: Duration,
    pub sources: BTreeMap<CollectionKind, TableSource>,
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(CollectionKind::Agenda, TableSource::new("Agenda", "Grid view"));
        sources.insert(CollectionKind::Alerts, TableSource::new("Alerts", "Grid view"));
        Self {
            api_url: "https://api.airtable.com/v0".into(),
            access_token: None,
            base_id: None,
            timeout: Duration::from_secs(30),
            sources,
        }
    }
}

/// Contract methods used for a collection on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMethods {
    pub view: String,
    pub commit: String,
    /// Argument name carrying the JSON-encoded records on commit.
    pub commit_arg: String,
}

impl LedgerMethods {
    fn for_collection(kind: CollectionKind) -> Self {
        Self {
            view: format!("get_{kind}"),
            commit: format!("set_{kind}"),
            commit_arg: format!("new_{kind}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerStoreConfig {
    pub gateway_url: Option<String>,
    pub contract_id: Option<String>,
    pub timeout: Duration,
    /// Status polls after a commit times out with a known transaction hash.
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub gas: String,
    pub deposit: String,
    pub methods: BTreeMap<CollectionKind, LedgerMethods>,
}

impl Default for LedgerStoreConfig {
    fn default() -> Self {
        let methods = CollectionKind::ALL
            .into_iter()
            .map(|kind| (kind, LedgerMethods::for_collection(kind)))
            .collect();
        Self {
            gateway_url: None,
            contract_id: None,
            timeout: Duration::from_secs(60),
            poll_attempts: 20,
            poll_interval: Duration::from_secs(3),
            gas: "30000000000000".into(),
            deposit: "0".into(),
            methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn collection_kind_parses_closed_set() {
        assert_eq!("agenda".parse::<CollectionKind>().unwrap(), CollectionKind::Agenda);
        assert_eq!("alerts".parse::<CollectionKind>().unwrap(), CollectionKind::Alerts);
        let err = "tickets".parse::<CollectionKind>().unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!("Agenda".parse::<CollectionKind>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = HostConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.scheduler.coalesce_delay, Duration::from_millis(2000));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_delay, Duration::from_millis(1000));
        assert_eq!(cfg.retry.max_delay, Duration::from_secs(30));
        assert!(cfg.collections.is_empty());
        assert_eq!(cfg.ledger.poll_attempts, 20);
        assert_eq!(
            cfg.ledger.methods[&CollectionKind::Alerts],
            LedgerMethods {
                view: "get_alerts".into(),
                commit: "set_alerts".into(),
                commit_arg: "new_alerts".into(),
            }
        );
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = HostConfig::from_lookup(lookup(&[
            ("LSYNC_BIND", "0.0.0.0:9000"),
            ("LSYNC_COALESCE_DELAY_MS", "50"),
            ("LSYNC_RETRY_MAX_ATTEMPTS", "3"),
            ("LSYNC_RETRY_JITTER", "true"),
            ("AGENDA_MAC_SECRET_BASE64", "c2VjcmV0"),
            ("AGENDA_ID_FIELD", "Slug"),
            ("LEDGER_CONTRACT_ID", "factory.testnet"),
        ]))
        .unwrap();
        assert_eq!(cfg.http_server.bind.port(), 9000);
        assert_eq!(cfg.scheduler.coalesce_delay, Duration::from_millis(50));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.retry.jitter);
        let agenda = cfg.collection(CollectionKind::Agenda).expect("agenda configured");
        assert_eq!(agenda.secret.as_bytes(), b"secret");
        assert_eq!(agenda.merge_strategy(), MergeStrategy::Keyed("Slug".into()));
        assert!(cfg.collection(CollectionKind::Alerts).is_none());
        assert_eq!(cfg.ledger.contract_id.as_deref(), Some("factory.testnet"));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = HostConfig::from_lookup(lookup(&[("LSYNC_COALESCE_DELAY_MS", "soon")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = HostConfig::from_lookup(lookup(&[("ALERTS_MAC_SECRET_BASE64", "***")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = HostConfig::from_lookup(lookup(&[("LSYNC_RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
