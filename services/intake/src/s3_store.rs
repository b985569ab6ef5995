use crate::archive::{MediaStore, Payload, StorageObject, StoredUpload, UploadObject};
use crate::config::S3Config;
use crate::error::StorageError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// S3-compatible media store (AWS, MinIO, LocalStack)
///
/// Objects are keyed `<folder>/<public_id>.<ext>`; returned URLs are
/// presigned GETs since the bucket is expected to be private.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    url_expiry: Duration,
}

impl S3Store {
    /// Build the client; an empty bucket is reported per request, not here
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Ok(Self::from_client(
            S3Client::from_conf(builder.build()),
            config,
        ))
    }

    pub fn from_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            url_expiry: config.presigned_url_expiry(),
        }
    }

    fn ensure_configured(&self) -> Result<(), StorageError> {
        if self.bucket.is_empty() {
            Err(StorageError::NotConfigured("storage.s3.bucket".to_string()))
        } else {
            Ok(())
        }
    }

    async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(self.url_expiry).map_err(|e| {
            StorageError::NotConfigured(format!("storage.s3.presigned_url_expiry_secs ({e})"))
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(sdk_error)?;

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl MediaStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, object), fields(folder = %object.folder, public_id = %object.public_id))]
    async fn upload(&self, object: UploadObject) -> Result<StorageObject, StorageError> {
        self.ensure_configured()?;

        let extension = object.extension().unwrap_or_default();
        let key = object_key(&object.folder, &object.public_id, &extension);
        let byte_size = object.payload.len();

        let body = match object.payload {
            Payload::Bytes(bytes) => ByteStream::from(bytes),
            Payload::File { path, .. } => ByteStream::from_path(&path)
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))?,
        };

        debug!(s3_key = %key, size_bytes = byte_size, "Uploading object to S3");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_length(byte_size as i64)
            .content_type(content_type(&extension))
            .tagging(tagging(&object.tags));

        // Header values must be ASCII
        for (name, value) in &object.context {
            request = request.metadata(
                metadata_key(name),
                urlencoding::encode(value).into_owned(),
            );
        }

        request.send().await.map_err(sdk_error)?;

        Ok(StorageObject {
            url: self.presigned_url(&key).await?,
            object_id: key,
            format: extension,
            byte_size,
        })
    }

    #[instrument(skip(self))]
    async fn list_folder(
        &self,
        folder: &str,
        max_results: u32,
    ) -> Result<Vec<StoredUpload>, StorageError> {
        self.ensure_configured()?;

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{}/", folder.trim_end_matches('/')))
            .max_keys(max_results.min(i32::MAX as u32) as i32)
            .send()
            .await
            .map_err(sdk_error)?;

        let mut uploads = Vec::new();
        for obj in response.contents() {
            let Some(key) = obj.key() else { continue };
            uploads.push(StoredUpload {
                object_id: key.to_string(),
                url: self.presigned_url(key).await?,
                format: crate::archive::file_extension(key).unwrap_or_default(),
                byte_size: obj.size().unwrap_or_default().max(0) as u64,
                created_at: obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
            });
        }

        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(uploads)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.ensure_configured()?;

        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(ref service) => StorageError::Rejected {
            status: service.raw().status().as_u16(),
            message: service
                .err()
                .message()
                .or_else(|| service.err().code())
                .unwrap_or("request rejected")
                .to_string(),
        },
        other => StorageError::Transport(DisplayErrorContext(&other).to_string()),
    }
}

/// `<folder>/<public_id>.<ext>`, or no suffix when the extension is unknown
pub fn object_key(folder: &str, public_id: &str, extension: &str) -> String {
    let folder = folder.trim_end_matches('/');
    if extension.is_empty() {
        format!("{folder}/{public_id}")
    } else {
        format!("{folder}/{public_id}.{}", extension.to_lowercase())
    }
}

/// Content type for an accepted file extension
pub fn content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Tag set in the URL-encoded form `x-amz-tagging` expects
///
/// Tags arrive as `[date, purpose, shop]`, matching what the archive builds.
pub fn tagging(tags: &[String]) -> String {
    ["event-date", "purpose", "shop-name"]
        .iter()
        .zip(tags)
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `shopName` -> `shop-name`
fn metadata_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            key.push('-');
            key.push(c.to_ascii_lowercase());
        } else {
            key.push(c);
        }
    }
    key
}
