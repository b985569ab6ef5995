use crate::archive::{MediaStore, Payload, StorageObject, StoredUpload, UploadObject};
use crate::config::CloudinaryConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, instrument};

/// Cloudinary media store using the signed REST upload API
#[derive(Debug, Clone)]
pub struct CloudinaryStore {
    client: Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    format: Option<String>,
    bytes: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    resources: Vec<SearchResource>,
}

#[derive(Debug, Deserialize)]
struct SearchResource {
    public_id: String,
    secure_url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryStore {
    pub fn new(config: &CloudinaryConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StorageError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1_1/{}/{}", self.base_url, self.cloud_name, path)
    }

    fn ensure_configured(&self) -> Result<(), StorageError> {
        let missing: Vec<&str> = [
            ("cloud_name", &self.cloud_name),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StorageError::NotConfigured(missing.join(", ")))
        }
    }

    async fn file_part(payload: Payload, file_name: &str) -> Result<Part, StorageError> {
        let part = match payload {
            Payload::Bytes(bytes) => {
                let len = bytes.len() as u64;
                Part::stream_with_length(Body::from(bytes), len)
            }
            Payload::File { path, len } => {
                let file = tokio::fs::File::open(&path).await?;
                Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
            }
        };
        Ok(part.file_name(file_name.to_string()))
    }

    /// Turn a non-2xx response into the remote's own error message
    async fn rejection(response: Response) -> StorageError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    "empty response body".to_string()
                } else {
                    text
                }
            });
        StorageError::Rejected { status, message }
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    #[instrument(skip(self, object), fields(folder = %object.folder, public_id = %object.public_id))]
    async fn upload(&self, object: UploadObject) -> Result<StorageObject, StorageError> {
        self.ensure_configured()?;

        let timestamp = Utc::now().timestamp().to_string();
        let context = encode_context(&object.context);
        let tags = object.tags.join(",");

        let signed = [
            ("context", context.clone()),
            ("folder", object.folder.clone()),
            ("public_id", object.public_id.clone()),
            ("tags", tags.clone()),
            ("timestamp", timestamp.clone()),
        ];
        let signature = sign(&signed, &self.api_secret);

        let extension = object.extension();
        let part = Self::file_part(object.payload, &object.file_name).await?;
        let form = Form::new()
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("folder", object.folder)
            .text("public_id", object.public_id)
            .text("context", context)
            .text("tags", tags)
            .part("file", part);

        debug!("Uploading to Cloudinary");

        // `auto` lets Cloudinary decide between image and raw/document
        let response = self
            .client
            .post(self.endpoint("auto/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Cloudinary upload request failed");
                StorageError::Transport(e.to_string())
            })?;

        if !response.status().is_success() {
            let err = Self::rejection(response).await;
            error!(error = %err, "Cloudinary rejected upload");
            return Err(err);
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;

        Ok(StorageObject {
            url: body.secure_url,
            object_id: body.public_id,
            format: body.format.or(extension).unwrap_or_default(),
            byte_size: body.bytes,
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
            .post(self.endpoint("resources/search"))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&serde_json::json!({
                "expression": format!("folder:{folder}"),
                "sort_by": [{ "created_at": "desc" }],
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;

        Ok(body
            .resources
            .into_iter()
            .map(|r| StoredUpload {
                object_id: r.public_id,
                url: r.secure_url,
                format: r.format.unwrap_or_default(),
                byte_size: r.bytes,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.ensure_configured()?;

        let response = self
            .client
            .get(self.endpoint("ping"))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }
}

/// Request signature: SHA-1 over the sorted `key=value` pairs joined by `&`,
/// followed by the API secret. Empty values are not signed.
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut pairs: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Context metadata as `key=value|key=value`, escaping `=` and `|`
pub fn encode_context(context: &[(String, String)]) -> String {
    fn escape(s: &str) -> String {
        s.replace('=', "\\=").replace('|', "\\|")
    }

    context
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join("|")
}
