use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Tag attached to every upload alongside the date and shop name
pub const PURPOSE_TAG: &str = "payment";

/// Maximum number of uploads returned by a folder listing
pub const LIST_LIMIT: u32 = 500;

/// Bytes handed to a media store
#[derive(Debug, Clone)]
pub enum Payload {
    /// Held in memory
    Bytes(Bytes),
    /// Buffered to a local file that outlives the upload call
    File { path: PathBuf, len: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(b) => b.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }
}

/// Everything a backend needs to write one object
#[derive(Debug, Clone)]
pub struct UploadObject {
    pub payload: Payload,
    /// Client-side file name, used for the extension and content type
    pub file_name: String,
    /// Folder the object lands in, e.g. `Anokha_Payments/2025-02-20`
    pub folder: String,
    /// Object identifier within the folder
    pub public_id: String,
    /// Key/value context stored with the object
    pub context: Vec<(String, String)>,
    pub tags: Vec<String>,
}

impl UploadObject {
    /// Lowercased extension of the client file name, without the dot
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.file_name)
    }
}

/// Result of a successful remote write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Secure URL of the stored object
    pub url: String,
    /// Identifier assigned by the store
    pub object_id: String,
    /// Format detected by the store
    pub format: String,
    pub byte_size: u64,
}

/// A stored screenshot with the identifier chosen for it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedUpload {
    pub public_id: String,
    /// `public_id` plus the lowercased client extension
    pub file_name: String,
    pub object: StorageObject,
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    pub object_id: String,
    pub url: String,
    pub format: String,
    pub byte_size: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Remote media store receiving the screenshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Write one object
    async fn upload(&self, object: UploadObject) -> Result<StorageObject, StorageError>;

    /// Objects in `folder`, newest first
    async fn list_folder(
        &self,
        folder: &str,
        max_results: u32,
    ) -> Result<Vec<StoredUpload>, StorageError>;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Stores payment screenshots in date-partitioned folders
#[derive(Clone)]
pub struct PaymentArchive {
    store: Arc<dyn MediaStore>,
    root_folder: String,
}

impl PaymentArchive {
    pub fn new(store: Arc<dyn MediaStore>, root_folder: impl Into<String>) -> Self {
        Self {
            store,
            root_folder: root_folder.into(),
        }
    }

    /// Folder holding the uploads of `date`
    pub fn folder_for(&self, date: NaiveDate) -> String {
        format!("{}/{}", self.root_folder, date.format("%Y-%m-%d"))
    }

    /// Upload a screenshot for `shop_name` into the folder of `event_date`
    #[instrument(skip(self, payload), fields(backend = self.store.name(), size = payload.len()))]
    pub async fn store(
        &self,
        payload: Payload,
        original_file_name: &str,
        event_date: NaiveDate,
        shop_name: &str,
    ) -> Result<ArchivedUpload, StorageError> {
        let captured_at = Utc::now();
        let date = event_date.format("%Y-%m-%d").to_string();
        let public_id = object_id(shop_name, captured_at);
        let file_name = match file_extension(original_file_name) {
            Some(ext) => format!("{public_id}.{ext}"),
            None => public_id.clone(),
        };

        let object = UploadObject {
            payload,
            file_name: original_file_name.to_string(),
            folder: self.folder_for(event_date),
            public_id: public_id.clone(),
            context: vec![
                ("shopName".to_string(), shop_name.to_string()),
                (
                    "uploadDate".to_string(),
                    captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
            ],
            tags: vec![date, PURPOSE_TAG.to_string(), shop_name.to_string()],
        };

        let folder = object.folder.clone();
        let started = Instant::now();
        let result = self.store.upload(object).await;
        metrics::histogram!(
            "intake_storage_duration_seconds",
            "backend" => self.store.name()
        )
        .record(started.elapsed().as_secs_f64());

        let stored = result?;
        info!(
            folder = %folder,
            object_id = %stored.object_id,
            format = %stored.format,
            byte_size = stored.byte_size,
            "Screenshot stored"
        );
        Ok(ArchivedUpload {
            public_id,
            file_name,
            object: stored,
        })
    }

    /// Uploads stored for `date`, newest first
    #[instrument(skip(self))]
    pub async fn list(&self, date: NaiveDate) -> Result<Vec<StoredUpload>, StorageError> {
        self.store
            .list_folder(&self.folder_for(date), LIST_LIMIT)
            .await
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        self.store.ping().await
    }

    /// Ping the backend, logging the outcome
    pub async fn verify_connection(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => {
                info!(backend = self.store.name(), "Storage connection successful");
                true
            }
            Err(e) => {
                warn!(backend = self.store.name(), error = %e, "Storage connection failed");
                false
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }
}

/// Identifier for an upload: sanitized shop name plus capture time
///
/// `Tea Stall #3` at 2025-02-21T10:30:45.123Z becomes
/// `Tea_Stall__3_2025-02-21T10-30-45-123Z`.
pub fn object_id(shop_name: &str, captured_at: DateTime<Utc>) -> String {
    let timestamp = captured_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_{}", sanitize_shop_name(shop_name), timestamp)
}

/// Replace everything outside `[A-Za-z0-9]` with `_`
pub fn sanitize_shop_name(shop_name: &str) -> String {
    shop_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Lowercased extension of `file_name`, without the dot
pub fn file_extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 21, 10, 30, 45).unwrap() + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_object_id_format() {
        assert_eq!(
            object_id("Tea Stall #3", captured()),
            "Tea_Stall__3_2025-02-21T10-30-45-123Z"
        );
    }

    #[test]
    fn test_sanitize_shop_name() {
        assert_eq!(sanitize_shop_name("Chai Point"), "Chai_Point");
        assert_eq!(sanitize_shop_name("a/b\\c..d"), "a_b_c__d");
        assert_eq!(sanitize_shop_name("Café ☕"), "Caf___");
        assert_eq!(sanitize_shop_name("Shop42"), "Shop42");
    }

    #[test]
    fn test_object_id_only_safe_characters() {
        for name in ["Tea Stall #3", "மசாலா தோசை", "O'Brien & Sons!", "  ", "日本"] {
            let sanitized = sanitize_shop_name(name);
            assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            assert_eq!(sanitized.chars().count(), name.chars().count());

            // The timestamp half only adds digits, `T`, `Z` and dashes
            let id = object_id(name, Utc::now());
            assert!(id.starts_with(&format!("{sanitized}_")));
            assert!(
                id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "{id}"
            );
        }
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("receipt.JPG"), Some("jpg".to_string()));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension(".hidden"), None);
    }

    #[tokio::test]
    async fn test_store_builds_partitioned_object() {
        let mut store = MockMediaStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_upload()
            .withf(|object| {
                object.folder == "Anokha_Payments/2025-02-21"
                    && object.public_id.starts_with("Tea_Stall__3_")
                    && object.tags == vec!["2025-02-21", "payment", "Tea Stall #3"]
                    && object.context[0] == ("shopName".to_string(), "Tea Stall #3".to_string())
                    && object.context[1].0 == "uploadDate"
                    && object.extension().as_deref() == Some("pdf")
            })
            .times(1)
            .returning(|object| {
                Ok(StorageObject {
                    url: "https://example.test/receipt.pdf".to_string(),
                    object_id: format!("{}/{}", object.folder, object.public_id),
                    format: "pdf".to_string(),
                    byte_size: object.payload.len(),
                })
            });

        let archive = PaymentArchive::new(Arc::new(store), "Anokha_Payments");
        let date = NaiveDate::from_ymd_opt(2025, 2, 21).unwrap();
        let stored = archive
            .store(
                Payload::Bytes(Bytes::from_static(b"%PDF-1.4")),
                "receipt.PDF",
                date,
                "Tea Stall #3",
            )
            .await
            .unwrap();

        assert_eq!(stored.object.byte_size, 8);
        assert!(stored
            .object
            .object_id
            .starts_with("Anokha_Payments/2025-02-21/Tea_Stall__3_"));
        // Timestamp half is the capture time, not the event date
        let timestamp = stored.public_id.strip_prefix("Tea_Stall__3_").unwrap();
        assert_eq!(timestamp.len(), "2025-02-21T10-30-45-123Z".len());
        assert_eq!(&timestamp[10..11], "T");
        assert!(timestamp.ends_with('Z'));
        assert!(!timestamp.contains([':', '.']));
        assert_eq!(stored.file_name, format!("{}.pdf", stored.public_id));
    }

    #[tokio::test]
    async fn test_store_surfaces_backend_error() {
        let mut store = MockMediaStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_upload()
            .returning(|_| Err(StorageError::Transport("network unreachable".to_string())));

        let archive = PaymentArchive::new(Arc::new(store), "Anokha_Payments");
        let err = archive
            .store(
                Payload::Bytes(Bytes::from_static(b"x")),
                "a.png",
                NaiveDate::from_ymd_opt(2025, 2, 21).unwrap(),
                "Shop",
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "network unreachable");
    }

    #[tokio::test]
    async fn test_repeated_uploads_get_distinct_ids() {
        let mut store = MockMediaStore::new();
        store.expect_name().return_const("mock");
        store.expect_upload().times(2).returning(|object| {
            Ok(StorageObject {
                url: String::new(),
                object_id: object.public_id,
                format: "png".to_string(),
                byte_size: 1,
            })
        });

        let archive = PaymentArchive::new(Arc::new(store), "Anokha_Payments");
        let date = NaiveDate::from_ymd_opt(2025, 2, 21).unwrap();
        let first = archive
            .store(Payload::Bytes(Bytes::from_static(b"x")), "a.png", date, "Shop")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = archive
            .store(Payload::Bytes(Bytes::from_static(b"x")), "a.png", date, "Shop")
            .await
            .unwrap();
        assert_ne!(first.public_id, second.public_id);
        assert_ne!(first.object.object_id, second.object.object_id);
    }

    #[tokio::test]
    async fn test_list_uses_date_folder() {
        let mut store = MockMediaStore::new();
        store
            .expect_list_folder()
            .withf(|folder, max| {
                folder.to_string() == "Anokha_Payments/2025-02-20" && *max == LIST_LIMIT
            })
            .returning(|_, _| Ok(vec![]));

        let archive = PaymentArchive::new(Arc::new(store), "Anokha_Payments");
        let uploads = archive
            .list(NaiveDate::from_ymd_opt(2025, 2, 20).unwrap())
            .await
            .unwrap();
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn test_verify_connection_is_non_fatal() {
        let mut store = MockMediaStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_ping()
            .returning(|| Err(StorageError::NotConfigured("api_key".to_string())));

        let archive = PaymentArchive::new(Arc::new(store), "Anokha_Payments");
        assert!(!archive.verify_connection().await);
    }
}
