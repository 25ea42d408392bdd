//! S3 implementation of the object store.

use std::path::Path;

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use s3::primitives::ByteStream;

use crate::error::{ErrorKind, TransportError};
use crate::store::ObjectStore;

#[derive(Clone, Debug)]
pub struct S3Store {
    /// The S3 client instance
    pub client: s3::Client,
}

impl S3Store {
    /// Builds a client from a pre-loaded AWS SDK config.
    ///
    /// The SDK's own retry policy applies to each call; [`crate::FileUploader`]
    /// adds its fixed-count retry on top.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mgevents::{FileUploader, S3Store, StoreConfig};
    ///
    /// # async fn example() {
    /// let config = aws_config::from_env().load().await;
    /// let uploader = FileUploader::new(S3Store::from_config(&config), StoreConfig::default());
    /// # }
    /// ```
    pub fn from_config(config: &SdkConfig) -> Self {
        Self {
            client: s3::Client::new(config),
        }
    }
}

impl ObjectStore for S3Store {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        let mut keys = Vec::new();
        let mut token = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|e| classify(bucket, prefix, e))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_string),
            );

            let Some(next) = output.next_continuation_token else {
                break;
            };
            token = Some(next);
        }

        Ok(keys)
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), TransportError> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            let message = format!("cannot read {}", path.display());
            TransportError::with_source(ErrorKind::NotFound, message, e)
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(bucket, key, e))?;

        Ok(())
    }

    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify(bucket, key, e))?;

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(bucket, key, e))?;

        Ok(())
    }

    async fn grant_read(
        &self,
        bucket: &str,
        key: &str,
        canonical_id: &str,
    ) -> Result<(), TransportError> {
        // The owner's id is only reachable through the object's current ACL.
        let acl = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(bucket, key, e))?;

        let owner = acl
            .owner()
            .and_then(|owner| owner.id())
            .ok_or_else(|| {
                TransportError::transient(format!("s3://{bucket}/{key} reports no owner"))
            })?;

        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .grant_full_control(format!("id={owner}"))
            .grant_read(format!("id={canonical_id}"))
            .send()
            .await
            .map_err(|e| classify(bucket, key, e))?;

        Ok(())
    }
}

pub fn kind_for_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => ErrorKind::NotFound,
        Some("AccessDenied") => ErrorKind::AccessDenied,
        _ => ErrorKind::Transient,
    }
}

fn classify<E, R>(bucket: &str, key: &str, err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) => ErrorKind::Timeout,
        _ => kind_for_code(err.code()),
    };
    let message = format!("s3://{bucket}/{key}: {}", DisplayErrorContext(&err));
    TransportError::with_source(kind, message, err)
}
