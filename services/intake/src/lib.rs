//! Payment Intake Service
//!
//! Receives payment screenshots from festival shop owners and files them in a
//! remote media store, one folder per festival day.
//!
//! ## Features
//!
//! - **Event-Day Classification**: The upload date is matched against the three
//!   configured festival dates; anything else is Day 0
//! - **Upload Validation**: Images (JPEG, PNG, GIF, WEBP) and PDF up to 10 MB,
//!   checked by both extension and declared MIME type
//! - **Pluggable Storage**: Cloudinary REST or any S3-compatible bucket behind
//!   the [`MediaStore`] trait
//! - **Memory or Disk Buffering**: Disk buffers are temp files removed on every
//!   exit path of a request
//!
//! ## Architecture
//!
//! ```text
//!  Browser form                                     Media store
//! ┌──────────────┐                                 ┌──────────────────────┐
//! │ POST         │                                 │ Anokha_Payments/     │
//! │ /api/upload  │                                 │   {date}/            │
//! └──────────────┘                                 │     {shop}_{ts}.ext  │
//!        │                                         └──────────────────────┘
//!        ▼                                                    ▲
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    │
//! │ Upload       │───▶│ Upload       │───▶│ Event        │    │
//! │ Buffer       │    │ Policy       │    │ Calendar     │    │
//! └──────────────┘    └──────────────┘    └──────────────┘    │
//!                                                │            │
//!                                                ▼            │
//!                                         ┌──────────────┐    │
//!                                         │ Payment      │────┘
//!                                         │ Archive      │
//!                                         └──────────────┘
//! ```

pub mod api;
pub mod archive;
pub mod cloudinary;
pub mod config;
pub mod error;
pub mod event_day;
pub mod s3_store;
pub mod upload_buffer;
pub mod upload_policy;

pub use api::{create_router, start_api_server, AppState};
pub use archive::{ArchivedUpload, MediaStore, PaymentArchive, StorageObject, StoredUpload};
pub use cloudinary::CloudinaryStore;
pub use config::Config;
pub use error::{IntakeError, StorageError};
pub use event_day::{classify, EventCalendar, EventDay};
pub use s3_store::S3Store;
pub use upload_buffer::{BufferStrategy, UploadBuffer};
pub use upload_policy::{UploadPolicy, UploadRequest, ValidatedUpload};
