use crate::error::ValidationError;
use crate::llm::ImageData;
use base64::Engine;
use tracing::{info, warn};

pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

/// Signature families recognized by magic-byte sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

/// An uploaded image that passed validation.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub declared_extension: String,
    pub mime_type: String,
}

impl ImageAsset {
    pub fn to_image_data(&self) -> ImageData {
        ImageData {
            base64_data: base64::engine::general_purpose::STANDARD.encode(&self.bytes),
            mime_type: self.mime_type.clone(),
        }
    }
}

pub struct ImageValidator;

impl ImageValidator {
    /// Validate an upload by extension, size and magic bytes, in that order.
    ///
    /// The MIME type comes from the declared extension; the sniffed format
    /// only decides accept or reject.
    pub fn validate(filename: &str, bytes: impl Into<Vec<u8>>) -> Result<ImageAsset, ValidationError> {
        let extension = Self::extension(filename).ok_or(ValidationError::UnsupportedExtension)?;
        let mime_type = Self::mime_for_extension(&extension).ok_or(ValidationError::UnsupportedExtension)?;

        let bytes = bytes.into();
        if bytes.len() > MAX_IMAGE_BYTES {
            warn!(
                event = "image_too_large",
                filename = %filename,
                size_bytes = bytes.len(),
                "Rejected oversized image"
            );
            return Err(ValidationError::TooLarge);
        }

        let Some(format) = ImageFormat::detect(&bytes) else {
            warn!(
                event = "image_content_mismatch",
                filename = %filename,
                extension = %extension,
                "Image bytes match no supported signature"
            );
            return Err(ValidationError::ContentMismatch);
        };

        info!(
            event = "image_validated",
            filename = %filename,
            detected_format = ?format,
            mime_type = mime_type,
            size_bytes = bytes.len(),
            "Image passed validation"
        );

        Ok(ImageAsset {
            bytes,
            declared_extension: extension,
            mime_type: mime_type.to_string(),
        })
    }

    fn extension(filename: &str) -> Option<String> {
        let (_, ext) = filename.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
    }

    fn mime_for_extension(extension: &str) -> Option<&'static str> {
        match extension {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "webp" => Some("image/webp"),
            "gif" => Some("image/gif"),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn accepts_each_supported_family() {
        assert_eq!(ImageValidator::validate("a.png", PNG).unwrap().mime_type, "image/png");
        assert_eq!(ImageValidator::validate("a.jpg", JPEG).unwrap().mime_type, "image/jpeg");
        assert_eq!(ImageValidator::validate("a.JPEG", JPEG).unwrap().mime_type, "image/jpeg");
        assert_eq!(ImageValidator::validate("a.gif", GIF).unwrap().mime_type, "image/gif");
        assert_eq!(ImageValidator::validate("a.webp", WEBP).unwrap().mime_type, "image/webp");
    }

    #[test]
    fn mime_follows_extension_not_content() {
        let asset = ImageValidator::validate("photo.gif", PNG).unwrap();
        assert_eq!(asset.mime_type, "image/gif");
        assert_eq!(asset.declared_extension, "gif");
    }

    #[test]
    fn rejects_unsupported_extensions_regardless_of_content() {
        for name in ["scan.bmp", "noextension", "archive.png.zip", "image."] {
            assert_eq!(
                ImageValidator::validate(name, PNG).unwrap_err(),
                ValidationError::UnsupportedExtension,
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_png_with_unrecognized_prefix() {
        assert_eq!(
            ImageValidator::validate("fake.png", b"%PDF-1.7 not an image".to_vec()).unwrap_err(),
            ValidationError::ContentMismatch
        );
        assert_eq!(
            ImageValidator::validate("empty.png", Vec::new()).unwrap_err(),
            ValidationError::ContentMismatch
        );
    }

    #[test]
    fn riff_without_webp_marker_is_rejected() {
        assert_eq!(
            ImageValidator::validate("clip.webp", b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec()).unwrap_err(),
            ValidationError::ContentMismatch
        );
    }

    #[test]
    fn size_limit_is_inclusive() {
        let mut at_limit = PNG.to_vec();
        at_limit.resize(MAX_IMAGE_BYTES, 0);
        assert!(ImageValidator::validate("big.png", at_limit).is_ok());

        assert_eq!(
            ImageValidator::validate("big.png", oversized_png()).unwrap_err(),
            ValidationError::TooLarge
        );
    }

    #[test]
    fn image_data_is_base64_encoded() {
        let data = ImageValidator::validate("a.gif", GIF).unwrap().to_image_data();
        assert_eq!(data.mime_type, "image/gif");
        assert_eq!(data.base64_data, "R0lGODlhAQABAA==");
    }
}
