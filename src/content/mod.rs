//! Core content types shared across the broadcast engine
//!
//! A [`ContentPayload`] is produced by an upstream content source (weather,
//! seismic, news collaborators) and consumed by the validator, formatter and
//! channel adapters. Payloads are immutable once constructed; the formatter
//! always returns a new payload rather than mutating its input.

pub mod formatter;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

pub use formatter::ContentFormatter;
pub use validator::{ContentValidator, ValidationError};

/// Coarse category of a content item, used to key rate limits and
/// per-channel eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Weather,
    WeatherAlert,
    Earthquake,
    News,
}

impl ContentClass {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::WeatherAlert => "weather_alert",
            Self::Earthquake => "earthquake",
            Self::News => "news",
        }
    }

    /// All known content classes
    pub fn all() -> [ContentClass; 4] {
        [
            Self::Weather,
            Self::WeatherAlert,
            Self::Earthquake,
            Self::News,
        ]
    }
}

impl std::fmt::Display for ContentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weather" => Ok(Self::Weather),
            "weather_alert" => Ok(Self::WeatherAlert),
            "earthquake" => Ok(Self::Earthquake),
            "news" => Ok(Self::News),
            other => Err(format!("Unknown content class: {other}")),
        }
    }
}

/// Filesystem locators for media attached to a payload.
///
/// Referential only: the engine never owns the file bytes, and lifetime of
/// the files belongs to the content-generation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Path to an image file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,

    /// Path to a video file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
}

impl MediaRef {
    /// Create a media reference for an image file
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: Some(path.into()),
            video_path: None,
        }
    }

    /// Check if the reference points at no media at all
    pub fn is_empty(&self) -> bool {
        self.image_path.is_none() && self.video_path.is_none()
    }
}

/// One content item as handed to the broadcast engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    /// Post body text
    pub text: String,

    /// Optional attached media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,

    /// Optional link to embed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,

    /// Optional link-preview title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,

    /// Optional link-preview description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,

    /// Free-form per-channel hints (e.g. a "tone" override)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub channel_hints: HashMap<String, serde_json::Value>,
}

impl ContentPayload {
    /// Create a payload with body text only
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attach media
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Attach a link URL
    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.link_url = Some(url.into());
        self
    }

    /// Set link-preview metadata
    pub fn with_meta(
        mut self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.meta_title = Some(title.into());
        self.meta_description = Some(description.into());
        self
    }

    /// Add a channel hint
    pub fn with_hint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.channel_hints.insert(key.into(), value);
        self
    }

    /// Look up a string-valued hint
    pub fn hint_str(&self, key: &str) -> Option<&str> {
        self.channel_hints.get(key).and_then(|v| v.as_str())
    }
}
