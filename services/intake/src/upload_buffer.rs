use crate::archive::Payload;
use crate::config::{BufferingMode, Config};
use crate::error::{IntakeError, StorageError};
use bytes::{Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Where incoming file bytes are held until the remote write finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferStrategy {
    /// Keep the whole file in memory (stateless deployments)
    Memory,
    /// Spool to a temp file in `dir`, removed when the buffer is dropped
    Disk { dir: PathBuf },
}

impl BufferStrategy {
    pub fn from_config(config: &Config) -> Self {
        match config.upload.buffering {
            BufferingMode::Memory => BufferStrategy::Memory,
            BufferingMode::Disk => BufferStrategy::Disk {
                dir: config.buffer_dir(),
            },
        }
    }

    /// Create the spool directory if this strategy needs one
    pub async fn prepare(&self) -> io::Result<()> {
        if let BufferStrategy::Disk { dir } = self {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Start buffering a file of at most `limit` bytes
    pub fn begin(&self, file_name: &str, limit: usize) -> io::Result<BufferWriter> {
        match self {
            BufferStrategy::Memory => Ok(BufferWriter::Memory {
                buf: BytesMut::new(),
                limit,
            }),
            BufferStrategy::Disk { dir } => {
                let suffix = Path::new(file_name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{}", e.to_ascii_lowercase()))
                    .unwrap_or_default();
                let named = tempfile::Builder::new()
                    .prefix("upload-")
                    .suffix(&suffix)
                    .tempfile_in(dir)?;
                let (file, path) = named.into_parts();
                debug!(path = %path.display(), "Spooling upload to disk");
                Ok(BufferWriter::Disk {
                    file: tokio::fs::File::from_std(file),
                    path,
                    written: 0,
                    limit,
                })
            }
        }
    }
}

/// In-progress buffer for one file part
pub enum BufferWriter {
    Memory {
        buf: BytesMut,
        limit: usize,
    },
    Disk {
        file: tokio::fs::File,
        path: TempPath,
        written: usize,
        limit: usize,
    },
}

impl BufferWriter {
    /// Append a chunk, refusing to grow past the limit
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), IntakeError> {
        match self {
            BufferWriter::Memory { buf, limit } => {
                if buf.len() + chunk.len() > *limit {
                    return Err(IntakeError::TooLarge { max_bytes: *limit });
                }
                buf.extend_from_slice(chunk);
            }
            BufferWriter::Disk {
                file,
                written,
                limit,
                ..
            } => {
                if *written + chunk.len() > *limit {
                    return Err(IntakeError::TooLarge { max_bytes: *limit });
                }
                file.write_all(chunk).await.map_err(StorageError::Io)?;
                *written += chunk.len();
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        match self {
            BufferWriter::Memory { buf, .. } => buf.len(),
            BufferWriter::Disk { written, .. } => *written,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and seal the buffer
    pub async fn finish(self) -> Result<UploadBuffer, IntakeError> {
        match self {
            BufferWriter::Memory { buf, .. } => Ok(UploadBuffer::Memory(buf.freeze())),
            BufferWriter::Disk {
                mut file,
                path,
                written,
                ..
            } => {
                file.flush().await.map_err(StorageError::Io)?;
                drop(file);
                Ok(UploadBuffer::Disk {
                    path,
                    len: written as u64,
                })
            }
        }
    }
}

/// A fully received file
///
/// Dropping a disk buffer deletes its temp file, so every exit path of a
/// request cleans up after itself.
#[derive(Debug)]
pub enum UploadBuffer {
    Memory(Bytes),
    Disk { path: TempPath, len: u64 },
}

impl UploadBuffer {
    pub fn len(&self) -> u64 {
        match self {
            UploadBuffer::Memory(bytes) => bytes.len() as u64,
            UploadBuffer::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Temp file backing this buffer, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            UploadBuffer::Memory(_) => None,
            UploadBuffer::Disk { path, .. } => Some(&**path),
        }
    }

    /// Payload referring to this buffer; the buffer must outlive the upload
    pub fn payload(&self) -> Payload {
        match self {
            UploadBuffer::Memory(bytes) => Payload::Bytes(bytes.clone()),
            UploadBuffer::Disk { path, len } => Payload::File {
                path: path.to_path_buf(),
                len: *len,
            },
        }
    }

    /// Delete the temp file now, logging instead of failing
    pub fn cleanup(self) {
        if let UploadBuffer::Disk { path, .. } = self {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                warn!(path = %shown, error = %e, "Failed to remove upload buffer");
            }
        }
    }
}
