use crate::archive::file_extension;
use crate::config::UploadConfig;
use crate::error::IntakeError;
use crate::upload_buffer::UploadBuffer;

/// File part of an upload form, already buffered
#[derive(Debug)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub buffer: UploadBuffer,
}

/// Raw form contents before validation
#[derive(Debug, Default)]
pub struct UploadRequest {
    pub file: Option<IncomingFile>,
    pub shop_name: Option<String>,
}

/// An upload that passed every check
#[derive(Debug)]
pub struct ValidatedUpload {
    pub file_name: String,
    pub buffer: UploadBuffer,
    /// Shop name with surrounding whitespace removed
    pub shop_name: String,
}

/// Which files the intake endpoint accepts
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_types: Vec<String>,
    max_file_bytes: usize,
}

impl UploadPolicy {
    pub fn new(allowed_types: &[String], max_file_bytes: usize) -> Self {
        Self {
            allowed_types: allowed_types
                .iter()
                .map(|t| t.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            max_file_bytes,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(&config.allowed_types, config.max_file_bytes)
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    fn allows(&self, token: &str) -> bool {
        self.allowed_types.iter().any(|t| t == token)
    }

    /// Both the extension and the declared MIME subtype must be allowed
    pub fn accepts(&self, file_name: &str, content_type: Option<&str>) -> bool {
        let extension_ok = file_extension(file_name).is_some_and(|ext| self.allows(&ext));
        let mime_ok = content_type
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|m| self.allows(&m.subtype().as_str().to_ascii_lowercase()));
        extension_ok && mime_ok
    }

    /// Message shown when a file type is refused
    pub fn rejection_message(&self) -> String {
        let has_jpeg = self.allows("jpeg");
        let images: Vec<String> = self
            .allowed_types
            .iter()
            .filter(|t| t.as_str() != "pdf" && !(has_jpeg && t.as_str() == "jpg"))
            .map(|t| t.to_ascii_uppercase())
            .collect();

        match (images.is_empty(), self.allows("pdf")) {
            (false, true) => format!(
                "Only image files ({}) and PDF are allowed!",
                images.join(", ")
            ),
            (false, false) => format!("Only image files ({}) are allowed!", images.join(", ")),
            (true, _) => "Only PDF files are allowed!".to_string(),
        }
    }

    /// Check an upload; rejected buffers are dropped, removing any temp file
    pub fn validate(&self, request: UploadRequest) -> Result<ValidatedUpload, IntakeError> {
        let file = request.file.ok_or(IntakeError::MissingFile)?;

        if file.buffer.is_empty() {
            return Err(IntakeError::EmptyFile);
        }

        let shop_name = request
            .shop_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(IntakeError::MissingField)?
            .to_string();

        if !self.accepts(&file.file_name, file.content_type.as_deref()) {
            return Err(IntakeError::UnsupportedType(self.rejection_message()));
        }

        if file.buffer.len() > self.max_file_bytes as u64 {
            return Err(IntakeError::TooLarge {
                max_bytes: self.max_file_bytes,
            });
        }

        Ok(ValidatedUpload {
            file_name: file.file_name,
            buffer: file.buffer,
            shop_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn policy() -> UploadPolicy {
        UploadPolicy::from_config(&UploadConfig::default())
    }

    fn file(name: &str, content_type: Option<&str>, data: &'static [u8]) -> IncomingFile {
        IncomingFile {
            file_name: name.to_string(),
            content_type: content_type.map(str::to_string),
            buffer: UploadBuffer::Memory(Bytes::from_static(data)),
        }
    }

    fn request(file: Option<IncomingFile>, shop: Option<&str>) -> UploadRequest {
        UploadRequest {
            file,
            shop_name: shop.map(str::to_string),
        }
    }

    #[test]
    fn test_accepts_allowed_types() {
        let p = policy();
        assert!(p.accepts("pay.jpg", Some("image/jpeg")));
        assert!(p.accepts("pay.JPEG", Some("image/jpeg")));
        assert!(p.accepts("pay.png", Some("image/png")));
        assert!(p.accepts("pay.gif", Some("image/gif")));
        assert!(p.accepts("pay.webp", Some("image/webp")));
        assert!(p.accepts("pay.pdf", Some("application/pdf")));
    }

    #[test]
    fn test_rejects_extension_mime_mismatch() {
        let p = policy();
        assert!(!p.accepts("setup.jpg", Some("application/x-msdownload")));
        assert!(!p.accepts("setup.exe", Some("image/png")));
        assert!(!p.accepts("pay.png", None));
        assert!(!p.accepts("noextension", Some("image/png")));
        assert!(!p.accepts("pay.png", Some("not a mime")));
    }

    #[test]
    fn test_webp_is_a_policy_choice() {
        let p = UploadPolicy::new(
            &["jpeg", "jpg", "png", "gif", "pdf"].map(String::from),
            1024,
        );
        assert!(!p.accepts("pay.webp", Some("image/webp")));
        assert_eq!(
            p.rejection_message(),
            "Only image files (JPEG, PNG, GIF) and PDF are allowed!"
        );
    }

    #[test]
    fn test_default_rejection_message() {
        assert_eq!(
            policy().rejection_message(),
            "Only image files (JPEG, PNG, GIF, WEBP) and PDF are allowed!"
        );
    }

    #[test]
    fn test_missing_file() {
        let err = policy().validate(request(None, Some("Shop"))).unwrap_err();
        assert!(matches!(err, IntakeError::MissingFile));
        assert_eq!(err.to_string(), "No file uploaded");
    }

    #[test]
    fn test_empty_file() {
        let err = policy()
            .validate(request(Some(file("a.png", Some("image/png"), b"")), Some("Shop")))
            .unwrap_err();
        assert!(matches!(err, IntakeError::EmptyFile));
    }

    #[test]
    fn test_blank_shop_name() {
        for shop in [None, Some(""), Some("   \t")] {
            let err = policy()
                .validate(request(Some(file("a.jpg", Some("image/jpeg"), b"\xff\xd8")), shop))
                .unwrap_err();
            assert_eq!(err.to_string(), "Shop Name is required");
        }
    }

    #[test]
    fn test_unsupported_type() {
        let err = policy()
            .validate(request(
                Some(file("setup.jpg", Some("application/octet-stream"), b"MZ")),
                Some("Shop"),
            ))
            .unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedType(_)));
    }

    #[test]
    fn test_too_large() {
        let p = UploadPolicy::new(&["png".to_string()], 2);
        let err = p
            .validate(request(Some(file("a.png", Some("image/png"), b"abc")), Some("Shop")))
            .unwrap_err();
        assert!(matches!(err, IntakeError::TooLarge { max_bytes: 2 }));
    }

    #[test]
    fn test_valid_upload_trims_shop_name() {
        let upload = policy()
            .validate(request(
                Some(file("Receipt.PDF", Some("application/pdf"), b"%PDF")),
                Some("  Tea Stall #3 "),
            ))
            .unwrap();
        assert_eq!(upload.shop_name, "Tea Stall #3");
        assert_eq!(upload.file_name, "Receipt.PDF");
        assert_eq!(upload.buffer.len(), 4);
    }
}
