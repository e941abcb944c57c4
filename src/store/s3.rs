//! `ObjectStore` backed by the AWS SDK.
//!
//! The SDK is async; the upload engine is not. The store owns a multi-thread
//! tokio runtime and every trait call is a `block_on` from the calling worker
//! thread, so several workers can have requests in flight at once.
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use bytes::Bytes;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, ObjectCannedAcl};
use tokio::runtime::Runtime;

use super::{
    CompletedPart, ObjectMeta, ObjectStore, Page, PutOptions, RemotePart, SessionMarker,
    SessionSummary, StoreError, StoreResult,
};

/// S3 allows at most 1000 uploads per listing page.
const MAX_UPLOADS_PER_PAGE: i32 = 1000;

#[derive(Debug, Clone)]
pub struct S3Options {
    pub region: String,
    /// Custom endpoint for S3-compatible services; bare `host:port` gets `http://`.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

pub struct S3Store {
    runtime: Runtime,
    client: Client,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").finish_non_exhaustive()
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", endpoint.trim_end_matches('/'))
    }
}

fn map_sdk_error<E>(err: SdkError<E>, what: &str) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let code = service_err.err().code().map(str::to_string);
            if status == 404 || matches!(code.as_deref(), Some("NoSuchKey" | "NotFound")) {
                return StoreError::NotFound(what.to_string());
            }
            StoreError::Service {
                status: Some(status),
                code,
                message: service_err
                    .err()
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
            }
        }
        SdkError::ConstructionFailure(_) => {
            StoreError::InvalidResponse(DisplayErrorContext(&err).to_string())
        }
        _ => StoreError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

fn canned_acl(opts: &PutOptions) -> Option<ObjectCannedAcl> {
    opts.acl.as_deref().map(ObjectCannedAcl::from)
}

impl S3Store {
    /// Build the client from the default credential chain plus `opts`.
    pub fn connect(opts: &S3Options) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to start runtime: {}", e)))?;

        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(opts.region.clone()))
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(RetryConfig::disabled());
        if let Some(endpoint) = &opts.endpoint {
            builder = builder.endpoint_url(normalize_endpoint(endpoint));
        }
        if opts.force_path_style {
            builder = builder.force_path_style(true);
        }

        tracing::debug!(
            "[s3cp][s3] client ready region={} endpoint={:?} path_style={}",
            opts.region,
            opts.endpoint,
            opts.force_path_style
        );
        Ok(Self { runtime, client: Client::from_conf(builder.build()) })
    }
}

impl ObjectStore for S3Store {
    fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta> {
        let out = self
            .runtime
            .block_on(self.client.head_object().bucket(bucket).key(key).send())
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(ObjectMeta {
            size: out.content_length().unwrap_or(0).max(0) as u64,
            etag: out.e_tag().unwrap_or_default().to_string(),
        })
    }

    fn list_sessions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&SessionMarker>,
    ) -> StoreResult<Page<SessionSummary, SessionMarker>> {
        let req = self
            .client
            .list_multipart_uploads()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .max_uploads(MAX_UPLOADS_PER_PAGE)
            .set_key_marker(marker.map(|m| m.key_marker.clone()))
            .set_upload_id_marker(marker.map(|m| m.upload_id_marker.clone()));
        let out = self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, prefix))?;

        let items = out
            .uploads()
            .iter()
            .filter_map(|u| match (u.key(), u.upload_id()) {
                (Some(key), Some(id)) => {
                    Some(SessionSummary { key: key.to_string(), upload_id: id.to_string() })
                }
                _ => None,
            })
            .collect();
        if out.is_truncated() != Some(true) {
            return Ok(Page::last(items));
        }
        let next = SessionMarker {
            key_marker: out.next_key_marker().unwrap_or_default().to_string(),
            upload_id_marker: out.next_upload_id_marker().unwrap_or_default().to_string(),
        };
        if next.key_marker.is_empty() {
            return Err(StoreError::InvalidResponse(
                "truncated upload listing without a key marker".to_string(),
            ));
        }
        Ok(Page { items, next: Some(next) })
    }

    fn create_session(&self, bucket: &str, key: &str, opts: &PutOptions) -> StoreResult<String> {
        let req = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(&opts.content_type)
            .set_acl(canned_acl(opts));
        let out = self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, key))?;
        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidResponse(format!("no upload id for {}", key)))
    }

    fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        marker: Option<&str>,
    ) -> StoreResult<Page<RemotePart, String>> {
        let req = self
            .client
            .list_parts()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .set_part_number_marker(marker.map(str::to_string));
        let out = self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, key))?;

        let mut items = Vec::with_capacity(out.parts().len());
        for p in out.parts() {
            let part_number = p.part_number().ok_or_else(|| {
                StoreError::InvalidResponse(format!("part without number in {}", upload_id))
            })?;
            items.push(RemotePart {
                part_number,
                size: p.size().unwrap_or(0).max(0) as u64,
                etag: p.e_tag().unwrap_or_default().to_string(),
            });
        }
        if out.is_truncated() != Some(true) {
            return Ok(Page::last(items));
        }
        match out.next_part_number_marker() {
            Some(m) if !m.is_empty() => Ok(Page { items, next: Some(m.to_string()) }),
            _ => Err(StoreError::InvalidResponse(
                "truncated part listing without a marker".to_string(),
            )),
        }
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        let req = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body));
        let out = self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, key))?;
        out.e_tag().map(str::to_string).ok_or_else(|| {
            StoreError::InvalidResponse(format!("no etag for part {} of {}", part_number, key))
        })
    }

    fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let manifest = parts
            .iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();
        let req = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(manifest)).build());
        self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: &PutOptions,
    ) -> StoreResult<()> {
        let req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(&opts.content_type)
            .set_acl(canned_acl(opts))
            .body(ByteStream::from(body));
        self.runtime.block_on(req.send()).map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(normalize_endpoint("https://s3.example.com/"), "https://s3.example.com");
        assert_eq!(normalize_endpoint("HTTP://Host"), "HTTP://Host");
    }

    #[test]
    fn acl_is_optional() {
        let mut opts = PutOptions::default();
        assert!(canned_acl(&opts).is_none());
        opts.acl = Some("private".to_string());
        assert_eq!(canned_acl(&opts), Some(ObjectCannedAcl::Private));
    }
}
