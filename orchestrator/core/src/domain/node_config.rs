// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Distributed Node Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing how one
// node takes part in distributed team runs:
// - Node identity, role and public base URL
// - Static peer directory and protected peers
// - Shared secrets for internal envelope signing
// - Retry, transport, idempotency and bridge cache tuning
// - Logging

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::domain::node::NodeDirectoryEntry;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "DistributedNodeConfig";

/// Top-level manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedNodeConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DistributedNodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DistributedNodeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedNodeSpec {
    pub node: NodeIdentity,

    /// Statically known peers; the discovery bridge may add more at runtime
    #[serde(default)]
    pub peers: Vec<NodeDirectoryEntry>,

    /// Peers the discovery bridge must never prune
    #[serde(default)]
    pub protected_node_ids: Vec<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable node identifier, also the signing key id
    pub id: String,

    pub role: NodeRole,

    /// URL other nodes use to reach this node
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Host,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Key id (node id) → secret. Values of the form "env:VAR" are read from
    /// the environment on every lookup, so secrets can rotate without reload.
    #[serde(default)]
    pub shared_secrets: HashMap<String, String>,

    #[serde(default = "default_max_clock_skew_ms")]
    pub max_clock_skew_ms: i64,
}

impl AuthConfig {
    pub fn resolve_secret(&self, key_id: &str) -> Option<String> {
        let raw = self.shared_secrets.get(key_id)?;
        match raw.strip_prefix("env:") {
            Some(var_name) => std::env::var(var_name).ok(),
            None => Some(raw.clone()),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secrets: HashMap::new(),
            max_clock_skew_ms: default_max_clock_skew_ms(),
        }
    }
}

pub const MAX_RETRY_ATTEMPTS: u32 = 20;
pub const MAX_BACKOFF_FACTOR: f64 = 16.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per attempt (4.0 gives 200ms, 800ms, ...)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Proportional jitter, e.g. 0.1 = ±10%
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_idempotency_ttl_ms")]
    pub ttl_ms: i64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_idempotency_ttl_ms(),
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_cache_entries")]
    pub processed_cache_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            processed_cache_capacity: default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace"); RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

// Default value functions
fn default_max_clock_skew_ms() -> i64 {
    5 * 60 * 1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_backoff_factor() -> f64 {
    4.0
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_idempotency_ttl_ms() -> i64 {
    10 * 60 * 1000
}

fn default_cache_entries() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DistributedNodeConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "aegis-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname.clone(),
                labels: None,
            },
            spec: DistributedNodeSpec {
                node: NodeIdentity {
                    id: hostname,
                    role: NodeRole::Host,
                    base_url: "http://127.0.0.1:8000".to_string(),
                },
                peers: vec![],
                protected_node_ids: vec![],
                auth: AuthConfig::default(),
                retry: RetryConfig::default(),
                transport: TransportConfig::default(),
                idempotency: IdempotencyConfig::default(),
                bridge: BridgeConfig::default(),
                observability: ObservabilityConfig::default(),
            },
        }
    }
}

impl DistributedNodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_DISTRIBUTED_CONFIG_PATH environment variable
    /// 2. ./aegis-distributed.yaml (working directory)
    /// 3. ~/.aegis/distributed.yaml (user home)
    /// 4. /etc/aegis/distributed.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AEGIS_DISTRIBUTED_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aegis-distributed.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("distributed.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/aegis/distributed.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse
        if let Some(path) = explicit_path {
            tracing::info!("Loading distributed configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading distributed configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No distributed configuration found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Container deployments override identity and log level via env vars
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AEGIS_NODE_ID") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: AEGIS_NODE_ID={}", val);
                self.spec.node.id = val;
            }
        }

        if let Ok(val) = std::env::var("AEGIS_NODE_BASE_URL") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: AEGIS_NODE_BASE_URL={}", val);
                self.spec.node.base_url = val;
            }
        }

        if let Ok(val) = std::env::var("AEGIS_LOG_LEVEL") {
            if !val.trim().is_empty() {
                self.spec.observability.logging.level = val;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let node = &self.spec.node;
        if node.id.trim().is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }
        url::Url::parse(&node.base_url)
            .map_err(|e| anyhow::anyhow!("spec.node.base_url '{}' is invalid: {}", node.base_url, e))?;

        let mut seen = HashSet::from([node.id.as_str()]);
        for peer in &self.spec.peers {
            if peer.node_id.trim().is_empty() {
                anyhow::bail!("Peer node_id cannot be empty");
            }
            if !seen.insert(peer.node_id.as_str()) {
                anyhow::bail!("Duplicate node id in peers: {}", peer.node_id);
            }
            url::Url::parse(&peer.base_url)
                .map_err(|e| anyhow::anyhow!("Peer '{}' base_url is invalid: {}", peer.node_id, e))?;
        }

        if self.spec.retry.max_attempts == 0 {
            anyhow::bail!("spec.retry.max_attempts must be at least 1");
        }
        if self.spec.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            anyhow::bail!("spec.retry.max_attempts must be at most {}", MAX_RETRY_ATTEMPTS);
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&self.spec.retry.backoff_factor) {
            anyhow::bail!("spec.retry.backoff_factor must be in [1, {}]", MAX_BACKOFF_FACTOR);
        }
        if !(0.0..1.0).contains(&self.spec.retry.jitter_ratio) {
            anyhow::bail!("spec.retry.jitter_ratio must be in [0, 1)");
        }
        if self.spec.idempotency.max_entries == 0 || self.spec.bridge.processed_cache_capacity == 0 {
            anyhow::bail!("Cache capacities must be at least 1");
        }

        Ok(())
    }

    /// Directory entries for this node followed by its peers.
    pub fn directory_entries(&self) -> Vec<NodeDirectoryEntry> {
        let mut entries = vec![NodeDirectoryEntry::new(
            self.spec.node.id.clone(),
            self.spec.node.base_url.clone(),
        )];
        entries.extend(self.spec.peers.iter().cloned());
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: DistributedNodeConfig
metadata:
  name: host-a
spec:
  node:
    id: host-a
    role: host
    base_url: http://10.0.0.1:8000
  peers:
    - node_id: worker-1
      base_url: http://10.0.0.2:8000/
    - node_id: worker-2
      base_url: http://10.0.0.3:8000
      is_healthy: false
  protected_node_ids: [worker-1]
  auth:
    shared_secrets:
      host-a: s3cret
      worker-1: "env:AEGIS_TEST_WORKER_SECRET_UNSET"
  retry:
    max_attempts: 5
"#;

    #[test]
    fn test_parse_sample_manifest() {
        let manifest = DistributedNodeConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.node.role, NodeRole::Host);
        assert_eq!(manifest.spec.peers.len(), 2);
        assert!(manifest.spec.peers[0].is_healthy);
        assert!(!manifest.spec.peers[1].is_healthy);
        assert_eq!(manifest.spec.retry.max_attempts, 5);
        assert_eq!(manifest.spec.retry.base_delay_ms, 200);
        assert_eq!(manifest.spec.observability.logging.format, LogFormat::Text);
        assert_eq!(manifest.directory_entries().len(), 3);
    }

    #[test]
    fn test_secret_resolution() {
        let manifest = DistributedNodeConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(manifest.spec.auth.resolve_secret("host-a").as_deref(), Some("s3cret"));
        assert_eq!(manifest.spec.auth.resolve_secret("worker-1"), None);
        assert_eq!(manifest.spec.auth.resolve_secret("nobody"), None);
    }

    #[test]
    fn test_validation() {
        let mut manifest = DistributedNodeConfigManifest::from_yaml_str(SAMPLE).unwrap();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.retry.max_attempts = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.retry.max_attempts = 3;

        manifest.spec.retry.backoff_factor = f64::INFINITY;
        assert!(manifest.validate().is_err());
        manifest.spec.retry.backoff_factor = 4.0;
        manifest.spec.retry.max_attempts = MAX_RETRY_ATTEMPTS + 1;
        assert!(manifest.validate().is_err());
        manifest.spec.retry.max_attempts = 3;

        manifest.spec.peers.push(NodeDirectoryEntry::new("worker-1", "http://dup:1"));
        assert!(manifest.validate().is_err());
        manifest.spec.peers.pop();

        manifest.spec.node.base_url = "not a url".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let manifest = DistributedNodeConfigManifest::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(manifest.metadata.name, "host-a");

        let missing = DistributedNodeConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/aegis.yaml")));
        assert!(missing.is_err());
    }

    #[test]
    fn test_default_manifest_is_valid() {
        let manifest = DistributedNodeConfigManifest::default();
        assert!(manifest.validate().is_ok());
    }
}
