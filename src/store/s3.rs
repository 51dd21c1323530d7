//! S3-compatible blob store adapter.
//!
//! Wraps `aws-sdk-s3` behind the synchronous [`BlobStore`] trait: the
//! adapter owns a small tokio runtime and blocks on it per call, so the
//! engine never needs an async context. Works against MinIO or AWS; the
//! addressing mode (path-style vs. virtual-hosted) follows the resolved
//! settings.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::config::S3Settings;
use crate::error::CacheError;
use crate::store::{BlobError, BlobStore};

pub struct S3BlobStore {
    client: Client,
    bucket: String,
    runtime: tokio::runtime::Runtime,
}

impl S3BlobStore {
    /// Build a client from resolved settings. No network I/O happens here;
    /// the first request will surface connectivity problems as `Transient`.
    pub fn new(settings: &S3Settings) -> Result<Self, CacheError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("kvc-s3")
            .enable_all()
            .build()
            .map_err(|e| CacheError::Config(format!("failed to start S3 I/O runtime: {e}")))?;

        let credentials = Credentials::from_keys(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
        );

        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.as_str())
            .credentials_provider(credentials)
            .force_path_style(settings.use_path_style)
            .build();

        debug!(
            endpoint = %settings.endpoint,
            bucket = %settings.bucket,
            path_style = settings.use_path_style,
            "S3 blob store configured"
        );

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: settings.bucket.clone(),
            runtime,
        })
    }
}

impl BlobStore for S3BlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.runtime.block_on(async {
            let out = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    if let SdkError::ServiceError(ref ctx) = err {
                        if ctx.err().is_no_such_key() {
                            return BlobError::NotFound;
                        }
                    }
                    BlobError::Transient(DisplayErrorContext(&err).to_string())
                })?;

            let body = out
                .body
                .collect()
                .await
                .map_err(|e| BlobError::Transient(format!("reading object body: {e}")))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map(|_| ())
                .map_err(|err| BlobError::Transient(DisplayErrorContext(&err).to_string()))
        })
    }

    fn delete(&self, key: &str) -> Result<(), BlobError> {
        // S3 DeleteObject is idempotent and does not report missing keys, so
        // every failure here is treated as transient.
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| BlobError::Transient(DisplayErrorContext(&err).to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Config;

    #[test]
    fn constructs_from_default_settings() {
        let settings = S3Config::default().resolve();
        assert!(S3BlobStore::new(&settings).is_ok());
    }
}
