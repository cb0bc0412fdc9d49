// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Layered configuration:
// - built-in defaults
// - optional TOML file
// - AUDIT_* environment variables (`__` separates nesting levels)
// - bare PORT, mapped onto server.port
// ============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ConfigError;
use crate::lookup::QueueFullPolicy;
use crate::{
    DEFAULT_HTTP_PORT, DEFAULT_LOOKUP_BLOCK_TIMEOUT_MS, DEFAULT_MANIFEST_PATH, DEFAULT_RESOLVER_TIMEOUT_SECS,
    DEFAULT_SCAN_RUNTIME_SECS, LATENCY_BUCKET_MS, LATENCY_MAX_MS, LOG_LENGTH_BUCKET_BYTES, LOG_LENGTH_MAX_BYTES,
    NAME_LOOKUP_QUEUE_CAPACITY, SOURCE_CHANNEL_CAPACITY,
};

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "AUDIT_";

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuditConfig {
    #[serde(default)]
    #[validate]
    pub server: ServerConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    #[validate]
    pub histograms: HistogramConfig,

    #[serde(default)]
    #[validate]
    pub name_lookup: NameLookupConfig,

    #[serde(default)]
    #[validate]
    pub source: SourceConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub manifest: ManifestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuditConfig {
    /// Load configuration. A path that is given must exist; with no path only
    /// defaults and the environment apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AuditConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::rejected("PORT", format!("'{port}' is not a TCP port")))?;
            figment = figment.merge(("server.port", port));
        }

        Self::extract(figment)
    }

    /// Defaults overlaid with a TOML document; no environment.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(AuditConfig::default())).merge(Toml::string(toml_str)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::Unparsable {
            message: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus the rules that span more than one field.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::rejected("config", e.to_string().replace('\n', "; ")))?;

        if self.histograms.latency_max_ms < self.histograms.latency_bucket_ms {
            return Err(ConfigError::rejected(
                "histograms.latency_max_ms",
                "must be at least one bucket wide",
            ));
        }
        if self.histograms.log_length_max_bytes < self.histograms.log_length_bucket_bytes {
            return Err(ConfigError::rejected(
                "histograms.log_length_max_bytes",
                "must be at least one bucket wide",
            ));
        }
        if self.scan.default_runtime.is_zero() {
            return Err(ConfigError::rejected("scan.default_runtime", "must be non-zero"));
        }
        if self.name_lookup.policy == SaturationPolicy::Block && self.name_lookup.block_timeout.is_zero() {
            return Err(ConfigError::rejected(
                "name_lookup.block_timeout",
                "must be non-zero with the block policy",
            ));
        }
        if self.resolver.kind == ResolverKind::Http
            && self.resolver.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            return Err(ConfigError::required("resolver.endpoint"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::rejected(
                "logging.format",
                format!("'{}' is not one of pretty, compact, json", self.logging.format),
            ));
        }
        Ok(())
    }

    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Sections
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Window length when a request carries no usable runtime
    #[serde(with = "humantime_serde")]
    pub default_runtime: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_runtime: Duration::from_secs(DEFAULT_SCAN_RUNTIME_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HistogramConfig {
    #[validate(range(min = 1))]
    pub latency_bucket_ms: u64,
    #[validate(range(min = 1))]
    pub latency_max_ms: u64,
    #[validate(range(min = 1))]
    pub log_length_bucket_bytes: u64,
    #[validate(range(min = 1))]
    pub log_length_max_bytes: u64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            latency_bucket_ms: LATENCY_BUCKET_MS,
            latency_max_ms: LATENCY_MAX_MS,
            log_length_bucket_bytes: LOG_LENGTH_BUCKET_BYTES,
            log_length_max_bytes: LOG_LENGTH_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    Block,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NameLookupConfig {
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    pub policy: SaturationPolicy,
    #[serde(with = "humantime_serde")]
    pub block_timeout: Duration,
}

impl NameLookupConfig {
    pub fn queue_full_policy(&self) -> QueueFullPolicy {
        match self.policy {
            SaturationPolicy::Block => QueueFullPolicy::Block {
                timeout: self.block_timeout,
            },
            SaturationPolicy::Drop => QueueFullPolicy::Drop,
        }
    }
}

impl Default for NameLookupConfig {
    fn default() -> Self {
        Self {
            queue_capacity: NAME_LOOKUP_QUEUE_CAPACITY,
            policy: SaturationPolicy::Block,
            block_timeout: Duration::from_millis(DEFAULT_LOOKUP_BLOCK_TIMEOUT_MS),
        }
    }
}

/// Newline-delimited JSON envelopes replayed from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("firehose.ndjson"),
            channel_capacity: SOURCE_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    None,
    Static,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub kind: ResolverKind,
    /// Apps API base URL, for `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Bearer token, for `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Identifier-to-name table, for `static`
    #[serde(default)]
    pub names: BTreeMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind: ResolverKind::None,
            endpoint: None,
            token: None,
            timeout: Duration::from_secs(DEFAULT_RESOLVER_TIMEOUT_SECS),
            names: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub path: PathBuf,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MANIFEST_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    /// Also write a daily-rolling log file here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            directory: None,
            file_prefix: "auditnozzle.log".into(),
            colors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AuditConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.scan.default_runtime, Duration::from_secs(600));
        assert_eq!(config.name_lookup.queue_capacity, 20_000);
        assert_eq!(config.histograms.latency_bucket_ms, 20);
    }

    #[test]
    fn test_generated_config_round_trips() {
        let text = AuditConfig::generate_default_config();
        assert!(text.contains("default_runtime = \"10m\""));
        let parsed = AuditConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, AuditConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let config = AuditConfig::from_toml_str(
            r#"
            [name_lookup]
            policy = "drop"

            [resolver]
            kind = "static"
            names = { g1 = "billing" }
            "#,
        )
        .unwrap();
        assert_eq!(config.name_lookup.queue_full_policy(), QueueFullPolicy::Drop);
        assert_eq!(config.name_lookup.queue_capacity, 20_000);
        assert_eq!(config.resolver.names["g1"], "billing");
    }

    #[test]
    fn test_http_resolver_needs_endpoint() {
        let err = AuditConfig::from_toml_str("[resolver]\nkind = \"http\"").unwrap_err();
        assert!(matches!(err, ConfigError::Required { .. }));
    }

    #[test]
    fn test_zero_bucket_rejected() {
        let err = AuditConfig::from_toml_str("[histograms]\nlatency_bucket_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Rejected { .. }));
    }

    #[test]
    fn test_bad_log_format_rejected() {
        let err = AuditConfig::from_toml_str("[logging]\nformat = \"xml\"").unwrap_err();
        assert!(err.to_string().contains("logging.format"));
    }

    #[test]
    fn test_missing_file() {
        let err = AuditConfig::load(Some(Path::new("/no/such/audit-nozzle.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn test_env_and_port_overrides() {
        figment::Jail::expect_with(|jail| {
            let mut file = NamedTempFile::new().map_err(|e| e.to_string())?;
            writeln!(file, "[scan]\ndefault_runtime = \"1m\"").map_err(|e| e.to_string())?;
            jail.set_env("AUDIT_MANIFEST__PATH", "/tmp/metrics.csv");
            jail.set_env("PORT", "9090");

            let config = AuditConfig::load(Some(file.path())).map_err(|e| e.to_string())?;
            assert_eq!(config.scan.default_runtime, Duration::from_secs(60));
            assert_eq!(config.manifest.path, PathBuf::from("/tmp/metrics.csv"));
            assert_eq!(config.server.port, 9090);
            Ok(())
        });
    }
}
