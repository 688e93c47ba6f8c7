//! Configuration validation.

use super::{is_postgres_type, Config};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if !is_postgres_type(&config.source.r#type) {
        return Err(MigrateError::Config(format!(
            "source.type must be 'postgres', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.dataset.is_empty() {
        return Err(MigrateError::Config("target.dataset is required".into()));
    }
    match config.target.r#type.to_lowercase().as_str() {
        kind if is_postgres_type(kind) => {
            if config.target.host.is_empty() {
                return Err(MigrateError::Config("target.host is required".into()));
            }
            if config.target.database.is_empty() {
                return Err(MigrateError::Config("target.database is required".into()));
            }
            if config.target.user.is_empty() {
                return Err(MigrateError::Config("target.user is required".into()));
            }
        }
        "jsonl" => {
            if config.target.output_dir.is_none() {
                return Err(MigrateError::Config(
                    "target.output_dir is required for the jsonl writer".into(),
                ));
            }
        }
        other => {
            return Err(MigrateError::Config(format!(
                "target.type must be 'postgres' or 'jsonl', got '{}'",
                other
            )));
        }
    }

    // De-identification validation
    match config.dlp.service.as_str() {
        "local" => {}
        "http" => {
            if config.dlp.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(MigrateError::Config(
                    "dlp.endpoint is required for the http service".into(),
                ));
            }
        }
        other => {
            return Err(MigrateError::Config(format!(
                "dlp.service must be 'local' or 'http', got '{}'",
                other
            )));
        }
    }
    if config.dlp.policy.bucket.is_empty() || config.dlp.policy.object.is_empty() {
        return Err(MigrateError::Config(
            "dlp.policy.bucket and dlp.policy.object are required".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    let migration = &config.migration;
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.page_size {
        return Err(MigrateError::Config(
            "migration.page_size must be at least 1".into(),
        ));
    }
    if migration.tokenize_batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.tokenize_batch_size must be at least 1".into(),
        ));
    }
    if migration.max_concurrent_tokenize_calls == 0 {
        return Err(MigrateError::Config(
            "migration.max_concurrent_tokenize_calls must be at least 1".into(),
        ));
    }
    if migration.tokenize_requests_per_second == 0 {
        return Err(MigrateError::Config(
            "migration.tokenize_requests_per_second must be at least 1".into(),
        ));
    }
    if migration.max_attempts == 0 {
        return Err(MigrateError::Config(
            "migration.max_attempts must be at least 1".into(),
        ));
    }
    for table in migration.column_renames.keys() {
        if migration
            .excluded_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
        {
            return Err(MigrateError::Config(format!(
                "migration.column_renames names excluded table '{}'",
                table
            )));
        }
    }

    Ok(())
}
