use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use tokio::runtime::Handle;

use crate::adapters::object_store::{DatasetStore, ObjectMetadata, StoreError};

/// Version id S3 reports for objects in a bucket without versioning.
const NULL_VERSION: &str = "null";

/// S3-backed dataset store.
///
/// Calls block on `runtime`, so they must be made from a blocking thread
/// (handlers run under `budget::run_with_budget`, which guarantees that).
#[derive(Debug, Clone)]
pub struct S3DatasetStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    runtime: Handle,
}

impl S3DatasetStore {
    pub fn new(bucket: impl Into<String>, client: aws_sdk_s3::Client, runtime: Handle) -> Self {
        Self {
            bucket: bucket.into(),
            client,
            runtime,
        }
    }
}

impl DatasetStore for S3DatasetStore {
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&metadata.content_type)
            .metadata("sha256", &metadata.sha256)
            .body(ByteStream::from(body.to_vec()));
        if let Some(source_url) = &metadata.source_url {
            request = request.metadata("source_url", source_url);
        }

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|error| {
                backend(
                    key,
                    format!("failed to write object to s3: {}", DisplayErrorContext(&error)),
                )
            })?;

        Ok(output.version_id().unwrap_or(NULL_VERSION).to_string())
    }

    fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Vec<u8>, StoreError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .set_version_id(version_id.map(str::to_string))
                    .send(),
            )
            .map_err(|error| {
                let missing = error
                    .as_service_error()
                    .map(|service| {
                        service.is_no_such_key() || service.code() == Some("NoSuchVersion")
                    })
                    .unwrap_or(false);
                if missing {
                    StoreError::NotFound {
                        key: key.to_string(),
                        version_id: version_id.map(str::to_string),
                    }
                } else {
                    backend(
                        key,
                        format!("failed to read object from s3: {}", DisplayErrorContext(&error)),
                    )
                }
            })?;

        let body = self
            .runtime
            .block_on(output.body.collect())
            .map_err(|error| backend(key, format!("failed to stream object body: {error}")))?;
        Ok(body.into_bytes().to_vec())
    }

    fn object_fingerprint(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self.runtime.block_on(
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        );

        match result {
            Ok(output) => Ok(output
                .metadata()
                .and_then(|metadata| metadata.get("sha256"))
                .cloned()),
            Err(error)
                if error
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false) =>
            {
                Ok(None)
            }
            Err(error) => Err(backend(
                key,
                format!("failed to head object in s3: {}", DisplayErrorContext(&error)),
            )),
        }
    }
}

fn backend(key: &str, message: String) -> StoreError {
    StoreError::Backend {
        key: key.to_string(),
        message,
    }
}
