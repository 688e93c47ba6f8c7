//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, recorded with each run.
    ///
    /// Passwords, the token key and the API token are left out, so the
    /// published hash reveals nothing about them.
    pub fn hash(&self) -> String {
        let mut public = self.clone();
        public.source.password.clear();
        public.target.password.clear();
        public.dlp.key = None;
        public.dlp.api_token = None;
        let yaml = serde_yaml::to_string(&public).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Whether a `type` value names the PostgreSQL driver.
pub fn is_postgres_type(kind: &str) -> bool {
    matches!(
        kind.to_lowercase().as_str(),
        "postgres" | "postgresql" | "pg"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: db.internal
  database: crm
  user: reader
  password: secret
target:
  type: jsonl
  dataset: analytics
  output_dir: /tmp/out
dlp:
  key: k
  policy:
    bucket: /etc/dlp
    object: policy.yaml
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 5432);
        assert_eq!(config.source.schema, "public");
        assert_eq!(config.dlp.service, "local");
        assert_eq!(config.dlp.token_prefix, "TOK_");
        assert_eq!(config.migration.max_attempts, 3);
        assert!(config.migration.fail_fast);
        assert!(config.migration.excluded_tables.is_empty());
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let b = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut c = a.clone();
        c.migration.excluded_tables.push("audit_log".into());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_hash_ignores_secrets() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let mut b = a.clone();
        b.source.password = "rotated".into();
        b.target.password = "rotated".into();
        b.dlp.key = Some("another-key".into());
        b.dlp.api_token = Some("token".into());
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_postgres_type_aliases() {
        assert!(is_postgres_type("postgres"));
        assert!(is_postgres_type("PostgreSQL"));
        assert!(is_postgres_type("pg"));
        assert!(!is_postgres_type("jsonl"));
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let broken = MINIMAL.replace("dataset: analytics", "dataset: \"\"");
        assert!(Config::from_yaml(&broken).is_err());
    }
}
