//! ermis.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErmisConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub defaults: AliasDefaults,
    #[serde(default)]
    pub secret: SecretConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Delegated-zone parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Canonical suffix appended to alias names (e.g. "cern.ch").
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    /// TSIG key name for the internal view.
    #[serde(default = "default_keyname_internal")]
    pub keyname_internal: String,
    /// TSIG key name for the external view.
    #[serde(default = "default_keyname_external")]
    pub keyname_external: String,
    /// Prefix of the description written on new delegated entries.
    #[serde(default = "default_description_prefix")]
    pub description_prefix: String,
}

/// Values applied to scalar fields when an alias is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasDefaults {
    #[serde(default = "default_behaviour")]
    pub behaviour: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    #[serde(default = "default_statistics")]
    pub statistics: String,
    #[serde(default = "default_clusters")]
    pub clusters: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Length of generated alias secrets.
    #[serde(default = "default_secret_length")]
    pub length: usize,
    /// Owners receive their secret at `<user>@<mail_domain>`.
    #[serde(default = "default_mail_domain")]
    pub mail_domain: String,
    #[serde(default = "default_mail_sender")]
    pub sender: String,
}

/// Static authorization grants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Users allowed to modify every alias.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Hostgroups each user may manage. A grant on `a/b` covers `a/b/c`.
    #[serde(default)]
    pub hostgroups: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "ermisd=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of the human format.
    #[serde(default)]
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain_suffix: default_domain_suffix(),
            keyname_internal: default_keyname_internal(),
            keyname_external: default_keyname_external(),
            description_prefix: default_description_prefix(),
        }
    }
}

impl Default for AliasDefaults {
    fn default() -> Self {
        Self {
            behaviour: default_behaviour(),
            metric: default_metric(),
            polling_interval: default_polling_interval(),
            statistics: default_statistics(),
            clusters: default_clusters(),
            tenant: default_tenant(),
            ttl: default_ttl(),
        }
    }
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            length: default_secret_length(),
            mail_domain: default_mail_domain(),
            sender: default_mail_sender(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

impl DnsConfig {
    /// Key name for the given view.
    pub fn keyname(&self, view: crate::types::View) -> &str {
        match view {
            crate::types::View::Internal => &self.keyname_internal,
            crate::types::View::External => &self.keyname_external,
        }
    }
}

impl AuthConfig {
    /// Build the principal for an authenticated username.
    pub fn principal(&self, username: &str) -> crate::resource::Principal {
        let hostgroups = self.hostgroups.get(username).cloned().unwrap_or_default();
        let mut principal = crate::resource::Principal::new(username).with_hostgroups(hostgroups);
        principal.admin = self.admins.iter().any(|a| a == username);
        principal
    }
}

impl ErmisConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ErmisConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/ermis")
}

fn default_domain_suffix() -> String {
    "cern.ch".to_string()
}

fn default_keyname_internal() -> String {
    "internal-key".to_string()
}

fn default_keyname_external() -> String {
    "external-key".to_string()
}

fn default_description_prefix() -> String {
    "Created by:".to_string()
}

fn default_behaviour() -> String {
    "mindless".to_string()
}

fn default_metric() -> String {
    "cmsfrontier".to_string()
}

fn default_polling_interval() -> u32 {
    300
}

fn default_statistics() -> String {
    "long".to_string()
}

fn default_clusters() -> String {
    "none".to_string()
}

fn default_tenant() -> String {
    "golang".to_string()
}

fn default_ttl() -> u32 {
    60
}

fn default_secret_length() -> usize {
    24
}

fn default_mail_domain() -> String {
    "cern.ch".to_string()
}

fn default_mail_sender() -> String {
    "lbd@cern.ch".to_string()
}

fn default_log_level() -> String {
    "info,ermisd=debug,ermis=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::View;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ErmisConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.dns.domain_suffix, "cern.ch");
        assert_eq!(config.defaults.polling_interval, 300);
        assert_eq!(config.defaults.ttl, 60);
        assert!(config.auth.admins.is_empty());
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[dns]
domain_suffix = "example"
keyname_external = "ext"

[auth]
admins = ["root"]

[auth.hostgroups]
alice = ["lb/web"]
"#;
        let config: ErmisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dns.domain_suffix, "example");
        assert_eq!(config.dns.keyname(View::External), "ext");
        assert_eq!(config.dns.keyname(View::Internal), "internal-key");
        assert_eq!(config.auth.admins, vec!["root".to_string()]);
        assert_eq!(config.auth.hostgroups["alice"], vec!["lb/web".to_string()]);
    }

    #[test]
    fn principal_from_grants() {
        let mut auth = AuthConfig::default();
        auth.admins.push("root".to_string());
        auth.hostgroups
            .insert("alice".to_string(), vec!["lb/web".to_string()]);

        let root = auth.principal("root");
        assert!(root.admin);
        let alice = auth.principal("alice");
        assert!(!alice.admin);
        assert!(alice.can_manage("lb/web/eu"));
        assert!(!auth.principal("bob").can_manage("lb/web"));
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = ErmisConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("domain_suffix"));
        assert!(toml_str.contains("mindless"));
    }
}
