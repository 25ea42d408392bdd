//! Object store access for bulk recipient lists.
//!
//! The provider reads recipient lists for bulk jobs from a bucket the account
//! owner controls. [`FileUploader`] pushes files there, grants the provider
//! read access and cleans them up, retrying each call a fixed number of times.

use std::fs::File;
use std::future::Future;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};

use crate::config::StoreConfig;
use crate::error::{ErrorKind, TransportError};

/// The object store operations [`FileUploader`] needs.
pub trait ObjectStore: Send + Sync {
    /// Keys in `bucket` starting with `prefix`.
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, TransportError>> + Send;

    fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn delete(&self, bucket: &str, key: &str)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Lets the account identified by `canonical_id` read the object while the
    /// owner keeps full control.
    fn grant_read(
        &self,
        bucket: &str,
        key: &str,
        canonical_id: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Gzips a recipient list next to the original and returns the new path.
///
/// `lists/job-1.xml` becomes `lists/job-1.gz`; any other name gets `.gz`
/// appended. An existing file at the output path is overwritten.
pub fn compress_file(path: &Path) -> std::io::Result<PathBuf> {
    let output = match path.extension() {
        Some(ext) if ext == "xml" => path.with_extension("gz"),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(".gz");
            PathBuf::from(name)
        }
    };

    let mut input = BufReader::new(File::open(path)?);
    let writer = BufWriter::new(File::create(&output)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;

    info!("compressed {} to {}", path.display(), output.display());
    Ok(output)
}

/// Uploads and removes recipient list files with a fixed-count retry loop.
pub struct FileUploader<S> {
    store: S,
    config: StoreConfig,
}

impl<S: ObjectStore> FileUploader<S> {
    pub fn new(store: S, config: StoreConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Uploads a local file under `key`.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] when an object already exists
    /// under the key, and with the last error once the retries are spent.
    pub async fn put_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_absent(bucket, key).await?;
        self.with_retry("put", move || {
            self.timed(key, self.store.put_file(bucket, key, path))
        })
        .await?;
        self.grant_provider_read(bucket, key).await;

        info!("uploaded {} to s3://{bucket}/{key}", path.display());
        Ok(())
    }

    /// Uploads an in-memory file under `key`. Same rules as [`Self::put_file`].
    pub async fn put_bytes(
        &self,
        bytes: Vec<u8>,
        bucket: &str,
        key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_absent(bucket, key).await?;
        self.with_retry("put", move || {
            self.timed(key, self.store.put_bytes(bucket, key, bytes.clone()))
        })
        .await?;
        self.grant_provider_read(bucket, key).await;

        info!("uploaded {key} to s3://{bucket}/{key}");
        Ok(())
    }

    /// Removes an object. Failures are logged, never returned.
    pub async fn delete(&self, bucket: &str, key: &str) {
        match self
            .with_retry("delete", move || self.store.delete(bucket, key))
            .await
        {
            Ok(()) => info!("deleted s3://{bucket}/{key}"),
            Err(e) => warn!("failed to delete s3://{bucket}/{key}: {e}"),
        }
    }

    /// Calls `operation` up to `max_error_retry` times, pausing `retry_delay`
    /// between attempts.
    ///
    /// # Arguments
    ///
    /// * `name` - Operation name used in log lines and the final error
    /// * `operation` - Builds a fresh attempt each time it is called
    ///
    /// # Errors
    ///
    /// Every error kind is retried. Once the attempts are spent, returns an
    /// error with the last attempt's kind and that attempt as its source.
    pub async fn with_retry<T, F, Fut>(
        &self,
        name: &str,
        mut operation: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let attempts = self.config.max_error_retry.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    return Err(TransportError::with_source(
                        e.kind(),
                        format!("{name} failed after {attempts} attempts"),
                        e,
                    ));
                }
                Err(e) => {
                    info!("{name} attempt {attempt} of {attempts} failed: {e}");
                    tokio::time::sleep(self.config.retry_delay()).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn ensure_absent(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        let existing = self
            .with_retry("list", move || self.store.list(bucket, key))
            .await?;

        if !existing.is_empty() {
            warn!("refusing to overwrite s3://{bucket}/{key}");
            return Err(TransportError::new(
                ErrorKind::AlreadyExists,
                format!("s3://{bucket}/{key} already exists"),
            ));
        }
        Ok(())
    }

    async fn timed<F>(&self, key: &str, upload: F) -> Result<(), TransportError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        tokio::time::timeout(self.config.put_timeout(), upload)
            .await
            .map_err(|_| {
                TransportError::new(
                    ErrorKind::Timeout,
                    format!("upload of {key} exceeded {:?}", self.config.put_timeout()),
                )
            })?
    }

    // The upload itself succeeded, so a permission failure is only logged.
    async fn grant_provider_read(&self, bucket: &str, key: &str) {
        let canonical_id = self.config.provider_canonical_id.as_str();
        if let Err(e) = self
            .with_retry("grant_read", move || {
                self.store.grant_read(bucket, key, canonical_id)
            })
            .await
        {
            warn!("failed to grant read access on s3://{bucket}/{key}: {e}");
        }
    }
}
