// restoretool/src/retrieval/s3_download.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::extract::extract_backup;
use super::{BackupDescriptor, BackupKind, BackupSource, FetchedBackups, select_latest_keys};
use crate::config::{RestoreConfig, S3StorageConfig};

/// Builds an S3 client from the optional explicit storage block, falling back
/// to the default AWS credential chain.
async fn build_client(storage: Option<&S3StorageConfig>) -> s3::Client {
    let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
    if let Some(storage) = storage {
        if let Some(region) = &storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&storage.access_key_id, &storage.secret_access_key) {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id,
                secret,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }
    }
    s3::Client::new(&loader.load().await)
}

/// Final local file name of an object key.
fn local_file_name(key: &str) -> Result<&str> {
    key.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .with_context(|| format!("Object key has no file name: {}", key))
}

/// Fetches backups from an S3 bucket into the local backup directory.
pub struct S3BackupSource {
    client: s3::Client,
    prefix: String,
    backup_directory: PathBuf,
    diff_limit: usize,
    zip_password: Option<String>,
}

impl S3BackupSource {
    pub async fn from_config(config: &RestoreConfig) -> Self {
        Self {
            client: build_client(config.s3_storage.as_ref()).await,
            prefix: config.backup_prefix.clone(),
            backup_directory: config.backup_directory.clone(),
            diff_limit: config.diff_candidate_limit,
            zip_password: std::env::var("ZIP_PASSWORD").ok().filter(|p| !p.is_empty()),
        }
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        info!(bucket, prefix = %self.prefix, "Fetching backup files from S3 bucket");
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| {
                format!("Failed to list objects in s3://{}/{}", bucket, self.prefix)
            })?;
            keys.extend(page.contents().iter().filter_map(|o| o.key()).map(str::to_string));
        }
        info!(bucket, count = keys.len(), "Listed backup objects");
        Ok(keys)
    }

    /// Downloads `key` into the backup directory unless it is already there.
    /// The body is streamed into a temporary file that is renamed into place
    /// only once complete.
    async fn download(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let destination = self.backup_directory.join(local_file_name(key)?);
        if destination.exists() {
            info!(path = %destination.display(), "Backup file already exists. Skipping download");
            return Ok(destination);
        }

        tokio::fs::create_dir_all(&self.backup_directory)
            .await
            .with_context(|| {
                format!("Failed to create backup directory: {}", self.backup_directory.display())
            })?;

        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.backup_directory)
            .with_context(|| {
                format!("Failed to create temporary file in {}", self.backup_directory.display())
            })?;
        let mut output_file = tokio::fs::File::from_std(
            temp.reopen().context("Failed to open temporary download file")?,
        );

        info!(bucket, key, destination = %destination.display(), "Downloading backup");
        let mut object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", bucket, key))?;

        let mut total_bytes_downloaded = 0usize;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", bucket, key))?
        {
            output_file.write_all(&bytes_chunk).await.with_context(|| {
                format!("Failed to write to temporary file for {}", destination.display())
            })?;
            total_bytes_downloaded += bytes_chunk.len();
        }
        output_file.flush().await?;
        drop(output_file);

        temp.persist(&destination)
            .with_context(|| format!("Failed to move download into place: {}", destination.display()))?;

        info!(
            bucket,
            key,
            bytes = total_bytes_downloaded,
            destination = %destination.display(),
            "Downloaded backup"
        );
        Ok(destination)
    }

    async fn materialize(&self, bucket: &str, key: &str, kind: BackupKind) -> Result<BackupDescriptor> {
        let archive_path = self.download(bucket, key).await?;
        let password = self.zip_password.clone();
        let archive = archive_path.clone();
        let local_path = tokio::task::spawn_blocking(move || extract_backup(&archive, password.as_deref()))
            .await
            .context("Extraction task panicked")??;
        info!(key, kind = %kind, path = %local_path.display(), "Backup ready");
        Ok(BackupDescriptor::new(key, kind, archive_path, local_path))
    }
}

#[async_trait]
impl BackupSource for S3BackupSource {
    async fn fetch_latest_backups(&self, bucket: &str) -> Result<FetchedBackups> {
        let keys = self.list_keys(bucket).await?;
        let latest = select_latest_keys(keys.iter().map(String::as_str), self.diff_limit);
        info!(full = ?latest.full, diffs = ?latest.diffs, "Selected backup candidates");

        let Some(full_key) = latest.full else {
            warn!(bucket, "No FULL backup found in S3");
            return Ok(FetchedBackups::default());
        };

        let full = self.materialize(bucket, &full_key, BackupKind::Full).await?;
        let mut diffs = Vec::with_capacity(latest.diffs.len());
        for key in &latest.diffs {
            diffs.push(self.materialize(bucket, key, BackupKind::Diff).await?);
        }
        Ok(FetchedBackups {
            full: Some(full),
            diffs,
        })
    }
}
