// restoretool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::restore::exclusive::ExclusiveModeSettings;
use crate::restore::poller::PollSchedule;
use crate::restore::sequencer::SequencerSettings;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 90;
const DEFAULT_MAX_WAIT_SECS: u64 = 1800;
const DEFAULT_MAX_EXCLUSIVE_MODE_ATTEMPTS: u32 = 3;
const DEFAULT_EVICTION_SETTLE_SECS: u64 = 5;
const DEFAULT_EXCLUSIVE_MODE_SETTLE_SECS: u64 = 2;
const DEFAULT_BACKUP_PREFIX: &str = "SQLBackups/";
const DEFAULT_DIFF_CANDIDATE_LIMIT: usize = 3;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_directory: Option<PathBuf>,
    pub database_name: Option<String>,
    pub engine_connection_string: Option<String>,
    pub storage_bucket_id: Option<String>,
    pub backup_prefix: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub max_exclusive_mode_attempts: Option<u32>,
    pub eviction_settle_secs: Option<u64>,
    pub exclusive_mode_settle_secs: Option<u64>,
    pub diff_candidate_limit: Option<usize>,
    pub log_file: Option<PathBuf>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct S3StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything one restore run needs. Built once from `config.json` and passed
/// down explicitly.
#[derive(Clone)]
pub struct RestoreConfig {
    pub backup_directory: PathBuf,
    pub database_name: String,
    pub engine_connection_string: String,
    pub storage_bucket_id: String,
    pub backup_prefix: String,
    pub poll_schedule: PollSchedule,
    pub max_exclusive_mode_attempts: u32,
    pub eviction_settle: Duration,
    pub exclusive_mode_settle: Duration,
    pub diff_candidate_limit: usize,
    pub log_file: Option<PathBuf>,
    pub s3_storage: Option<S3StorageConfig>,
}

impl fmt::Debug for RestoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreConfig")
            .field("backup_directory", &self.backup_directory)
            .field("database_name", &self.database_name)
            .field("engine_connection_string", &"<redacted>")
            .field("storage_bucket_id", &self.storage_bucket_id)
            .field("backup_prefix", &self.backup_prefix)
            .field("poll_schedule", &self.poll_schedule)
            .field("max_exclusive_mode_attempts", &self.max_exclusive_mode_attempts)
            .field("eviction_settle", &self.eviction_settle)
            .field("exclusive_mode_settle", &self.exclusive_mode_settle)
            .field("diff_candidate_limit", &self.diff_candidate_limit)
            .field("log_file", &self.log_file)
            .field("s3_storage", &self.s3_storage)
            .finish()
    }
}

impl RestoreConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        load_restore_config_from_json(&raw_json_config)
    }

    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            storage_bucket_id: self.storage_bucket_id.clone(),
            poll: self.poll_schedule,
            exclusive: ExclusiveModeSettings {
                max_attempts: self.max_exclusive_mode_attempts,
                eviction_settle: self.eviction_settle,
                switch_settle: self.exclusive_mode_settle,
                full_restore_wait: self.poll_schedule,
            },
        }
    }
}

fn required_string(value: &Option<String>, key: &str) -> Result<String> {
    let value = value
        .as_ref()
        .with_context(|| format!("{} must be set in config.json for restore", key))?;
    if value.trim().is_empty() {
        return Err(anyhow::anyhow!("{} cannot be empty in config.json.", key));
    }
    Ok(value.clone())
}

pub fn load_restore_config_from_json(raw_config: &RawJsonConfig) -> Result<RestoreConfig> {
    let backup_directory = raw_config
        .backup_directory
        .as_ref()
        .context("backup_directory must be set in config.json for restore")?
        .clone();
    if backup_directory.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("backup_directory cannot be empty in config.json."));
    }

    let database_name = required_string(&raw_config.database_name, "database_name")?;
    let engine_connection_string =
        required_string(&raw_config.engine_connection_string, "engine_connection_string")?;
    let storage_bucket_id = required_string(&raw_config.storage_bucket_id, "storage_bucket_id")?;

    let poll_interval = Duration::from_secs(
        raw_config
            .poll_interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
    );
    let max_wait = Duration::from_secs(raw_config.max_wait_secs.unwrap_or(DEFAULT_MAX_WAIT_SECS));
    let poll_schedule = PollSchedule::new(max_wait, poll_interval)
        .context("poll_interval_secs / max_wait_secs in config.json are inconsistent")?;

    let max_exclusive_mode_attempts = raw_config
        .max_exclusive_mode_attempts
        .unwrap_or(DEFAULT_MAX_EXCLUSIVE_MODE_ATTEMPTS);
    if max_exclusive_mode_attempts == 0 {
        return Err(anyhow::anyhow!(
            "max_exclusive_mode_attempts must be at least 1 in config.json."
        ));
    }

    let diff_candidate_limit = raw_config
        .diff_candidate_limit
        .unwrap_or(DEFAULT_DIFF_CANDIDATE_LIMIT);
    if diff_candidate_limit == 0 {
        return Err(anyhow::anyhow!(
            "diff_candidate_limit must be at least 1 in config.json."
        ));
    }

    let s3_storage = match &raw_config.s3_storage {
        Some(s3_raw) => {
            let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
            let access_key_id = non_empty(&s3_raw.access_key_id);
            let secret_access_key = non_empty(&s3_raw.secret_access_key);
            if access_key_id.is_some() != secret_access_key.is_some() {
                return Err(anyhow::anyhow!(
                    "s3_storage in config.json must set both access_key_id and secret_access_key, or neither."
                ));
            }
            Some(S3StorageConfig {
                region: non_empty(&s3_raw.region),
                endpoint_url: non_empty(&s3_raw.endpoint_url),
                access_key_id,
                secret_access_key,
            })
        }
        None => None,
    };

    Ok(RestoreConfig {
        backup_directory,
        database_name,
        engine_connection_string,
        storage_bucket_id,
        backup_prefix: raw_config
            .backup_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKUP_PREFIX.to_string()),
        poll_schedule,
        max_exclusive_mode_attempts,
        eviction_settle: Duration::from_secs(
            raw_config
                .eviction_settle_secs
                .unwrap_or(DEFAULT_EVICTION_SETTLE_SECS),
        ),
        exclusive_mode_settle: Duration::from_secs(
            raw_config
                .exclusive_mode_settle_secs
                .unwrap_or(DEFAULT_EXCLUSIVE_MODE_SETTLE_SECS),
        ),
        diff_candidate_limit,
        log_file: raw_config.log_file.clone(),
        s3_storage,
    })
}
