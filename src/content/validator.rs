//! Per-channel structural validation of content payloads
//!
//! The validator enforces a channel's structural contract (text length,
//! media size/format/dimensions, URL well-formedness) and reports every
//! violation it finds. It never returns early on the first error and it
//! never panics on unreadable media; an empty error list is the only
//! "valid" signal.

use image::ImageFormat;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::config::{ChannelConfig, MediaRules};
use crate::content::ContentPayload;

/// Limit on link-preview titles, shared by every channel
const META_TITLE_LIMIT: usize = 100;

/// A single violated validation rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Text is empty or whitespace-only
    #[error("Text content cannot be empty")]
    EmptyText,

    /// Text exceeds the channel's character limit
    #[error("Text length {len} exceeds channel limit of {limit} characters")]
    TextTooLong { len: usize, limit: usize },

    /// Referenced media file does not exist
    #[error("Media file not found: {0}")]
    MediaNotFound(String),

    /// Image dimensions below the channel minimum
    #[error("Image {width}x{height} below minimum {min_width}x{min_height}")]
    ImageTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },

    /// Image dimensions above the channel maximum
    #[error("Image {width}x{height} above maximum {max_width}x{max_height}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    /// Image file larger than the channel allows
    #[error("Image file size {size} exceeds limit of {limit} bytes")]
    ImageFileTooLarge { size: u64, limit: u64 },

    /// Image format not in the channel's allowed set
    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    /// Image file exists but could not be probed
    #[error("Unreadable image file: {0}")]
    UnreadableImage(String),

    /// Link URL is missing a scheme/host or is not http(s)
    #[error("Invalid link URL: {0}")]
    InvalidLink(String),

    /// Link-preview title over the shared limit
    #[error("Meta title length {len} exceeds {limit} characters")]
    MetaTitleTooLong { len: usize, limit: usize },
}

/// Stateless per-channel content validator
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentValidator;

impl ContentValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a payload against one channel's constraints.
    ///
    /// Returns every violated rule; an empty vector means the payload is
    /// acceptable for this channel.
    pub fn validate(
        &self,
        content: &ContentPayload,
        channel: &ChannelConfig,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        self.validate_text(&content.text, channel.text_limit, &mut errors);

        if let Some(media) = &content.media {
            if let Some(image_path) = &media.image_path {
                self.validate_image(image_path, &channel.media, &mut errors);
            }
            if let Some(video_path) = &media.video_path {
                if !video_path.exists() {
                    errors.push(ValidationError::MediaNotFound(
                        video_path.display().to_string(),
                    ));
                }
            }
        }

        if let Some(link) = &content.link_url {
            self.validate_link(link, &mut errors);
        }

        if let Some(title) = &content.meta_title {
            let len = title.chars().count();
            if len > META_TITLE_LIMIT {
                errors.push(ValidationError::MetaTitleTooLong {
                    len,
                    limit: META_TITLE_LIMIT,
                });
            }
        }

        errors
    }

    fn validate_text(&self, text: &str, limit: usize, errors: &mut Vec<ValidationError>) {
        if text.trim().is_empty() {
            errors.push(ValidationError::EmptyText);
            return;
        }

        let len = text.chars().count();
        if len > limit {
            errors.push(ValidationError::TextTooLong { len, limit });
        }
    }

    fn validate_image(&self, path: &Path, rules: &MediaRules, errors: &mut Vec<ValidationError>) {
        if !path.exists() {
            errors.push(ValidationError::MediaNotFound(path.display().to_string()));
            return;
        }

        match std::fs::metadata(path) {
            Ok(meta) => {
                if meta.len() > rules.max_bytes {
                    errors.push(ValidationError::ImageFileTooLarge {
                        size: meta.len(),
                        limit: rules.max_bytes,
                    });
                }
            }
            Err(e) => {
                errors.push(ValidationError::UnreadableImage(e.to_string()));
                return;
            }
        }

        // Probe header only; never decodes pixel data.
        let reader = match image::ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
        {
            Ok(reader) => reader,
            Err(e) => {
                errors.push(ValidationError::UnreadableImage(e.to_string()));
                return;
            }
        };

        match reader.format() {
            Some(format) => {
                let name = format_name(format);
                if !rules.allowed_formats.contains(name) {
                    errors.push(ValidationError::UnsupportedImageFormat(name.to_string()));
                }
            }
            None => {
                errors.push(ValidationError::UnsupportedImageFormat("unknown".to_string()));
            }
        }

        match image::ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| e.to_string())
            .and_then(|r| r.into_dimensions().map_err(|e| e.to_string()))
        {
            Ok((width, height)) => {
                if width < rules.min_width || height < rules.min_height {
                    errors.push(ValidationError::ImageTooSmall {
                        width,
                        height,
                        min_width: rules.min_width,
                        min_height: rules.min_height,
                    });
                }
                if width > rules.max_width || height > rules.max_height {
                    errors.push(ValidationError::ImageTooLarge {
                        width,
                        height,
                        max_width: rules.max_width,
                        max_height: rules.max_height,
                    });
                }
            }
            Err(e) => {
                errors.push(ValidationError::UnreadableImage(e));
            }
        }
    }

    fn validate_link(&self, link: &str, errors: &mut Vec<ValidationError>) {
        match Url::parse(link) {
            Ok(url) => {
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    errors.push(ValidationError::InvalidLink(link.to_string()));
                }
            }
            Err(_) => {
                errors.push(ValidationError::InvalidLink(link.to_string()));
            }
        }
    }
}

/// Canonical lowercase name for a probed image format
fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        _ => "other",
    }
}
