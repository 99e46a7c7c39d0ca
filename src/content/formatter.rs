//! Channel-specific content formatting
//!
//! The formatter turns one payload into the representation a channel will
//! actually send: tone rules first (declared in a rule table, not
//! hard-coded per channel), then character-aware truncation that reserves
//! the last 3 characters of the limit for an ellipsis marker.
//!
//! Formatting is pure and idempotent: the input payload is never mutated,
//! and formatting an already-formatted payload for the same channel
//! produces no further change.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::config::ChannelConfig;
use crate::content::ContentPayload;

/// Limit applied to link-preview descriptions on every channel
const META_DESCRIPTION_LIMIT: usize = 200;

/// One declarative tone adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum ToneRule {
    /// Remove emoji and decorative symbols
    StripDecorations,
    /// Keep at most `max` hashtags, dropping the rest
    LimitHashtags { max: usize },
}

impl ToneRule {
    fn apply(&self, text: &str) -> String {
        match self {
            Self::StripDecorations => decoration_re().replace_all(text, "").into_owned(),
            Self::LimitHashtags { max } => {
                let mut seen = 0usize;
                let result = hashtag_re().replace_all(text, |caps: &regex::Captures<'_>| {
                    seen += 1;
                    if seen <= *max {
                        caps[0].to_string()
                    } else {
                        String::new()
                    }
                });
                result.into_owned()
            }
        }
    }
}

fn decoration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\u{1F000}-\u{1FAFF}\u{2600}-\u{27BF}\u{2190}-\u{21FF}\u{FE0F}]")
            .expect("Invalid regex pattern")
    })
}

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s?#\w+").expect("Invalid regex pattern"))
}

/// Mapping from tone name to its rule list.
///
/// New channels pick a tone in configuration; no code change is needed to
/// give a channel different manners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneTable {
    tones: HashMap<String, Vec<ToneRule>>,
}

impl Default for ToneTable {
    fn default() -> Self {
        let mut tones = HashMap::new();
        tones.insert(
            "professional".to_string(),
            vec![
                ToneRule::StripDecorations,
                ToneRule::LimitHashtags { max: 3 },
            ],
        );
        tones.insert("plain".to_string(), vec![ToneRule::StripDecorations]);
        Self { tones }
    }
}

impl ToneTable {
    /// Register or replace the rules for a tone name
    pub fn set(&mut self, tone: impl Into<String>, rules: Vec<ToneRule>) {
        self.tones.insert(tone.into(), rules);
    }

    /// Rules for a tone name; unknown tones have no rules
    pub fn rules(&self, tone: &str) -> &[ToneRule] {
        self.tones.get(tone).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Stateless channel formatter
#[derive(Debug, Clone, Default)]
pub struct ContentFormatter {
    tones: ToneTable,
}

impl ContentFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a formatter with a custom tone table
    pub fn with_tones(tones: ToneTable) -> Self {
        Self { tones }
    }

    /// Format a payload for one channel, returning a new payload.
    ///
    /// A `tone` channel hint on the payload overrides the channel's
    /// configured tone.
    pub fn format(&self, content: &ContentPayload, channel: &ChannelConfig) -> ContentPayload {
        let mut formatted = content.clone();

        let tone = content
            .hint_str("tone")
            .or(channel.tone.as_deref());

        if let Some(tone) = tone {
            for rule in self.tones.rules(tone) {
                formatted.text = rule.apply(&formatted.text);
            }
        }

        formatted.text = truncate_chars(&formatted.text, channel.text_limit);

        if let Some(desc) = &formatted.meta_description {
            if desc.chars().count() > META_DESCRIPTION_LIMIT {
                formatted.meta_description =
                    Some(desc.chars().take(META_DESCRIPTION_LIMIT).collect());
            }
        }

        formatted
    }
}

/// Truncate to `limit` characters, reserving the final 3 for `"..."`.
///
/// A 280-char limit truncates to 277 content characters plus the marker, so
/// the result is exactly `limit` characters long. Texts within the limit
/// pass through unchanged.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    if limit <= 3 {
        return text.chars().take(limit).collect();
    }

    let mut truncated: String = text.chars().take(limit - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MediaRules, RateLimitConfig};
    use crate::content::ContentClass;
    use proptest::prelude::*;

    fn channel(limit: usize, tone: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            name: "test".to_string(),
            enabled: true,
            allowed_classes: ContentClass::all().into_iter().collect(),
            credentials: [("token".to_string(), "t".to_string())].into_iter().collect(),
            endpoint: Some("https://example.com/hook".to_string()),
            text_limit: limit,
            tone: tone.map(str::to_string),
            media: MediaRules::default(),
            rate_limit: RateLimitConfig::default(),
            max_retries: None,
            retry_base_delay_secs: None,
        }
    }

    #[test]
    fn test_truncation_exact_length() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("x".repeat(300));
        let result = formatter.format(&input, &channel(280, None));

        assert_eq!(result.text.chars().count(), 280);
        assert!(result.text.ends_with("..."));
    }

    #[test]
    fn test_short_text_unchanged() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("Clear skies tonight");
        let result = formatter.format(&input, &channel(280, None));
        assert_eq!(result, input);
    }

    #[test]
    fn test_professional_tone_strips_decorations() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("🌡️ Temperature: 72.0°F ☁️ Cloud Cover: 20%");
        let result = formatter.format(&input, &channel(280, Some("professional")));

        assert!(!result.text.contains('🌡'));
        assert!(!result.text.contains('☁'));
        assert!(result.text.contains("Temperature: 72.0°F"));
    }

    #[test]
    fn test_professional_tone_caps_hashtags() {
        let formatter = ContentFormatter::new();
        let input =
            ContentPayload::new("Storm inbound #VenturaWeather #VenturaCA #CaWeather #Storm #Rain");
        let result = formatter.format(&input, &channel(280, Some("professional")));

        assert_eq!(result.text.matches('#').count(), 3);
        assert!(result.text.contains("#CaWeather"));
        assert!(!result.text.contains("#Rain"));
    }

    #[test]
    fn test_payload_hint_overrides_channel_tone() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("⚠️ heads up")
            .with_hint("tone", serde_json::json!("professional"));
        // Channel has no tone, hint selects the professional rules.
        let result = formatter.format(&input, &channel(280, None));
        assert!(!result.text.contains('⚠'));
    }

    #[test]
    fn test_unknown_tone_is_identity() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("🎉 party time #yes #no");
        let result = formatter.format(&input, &channel(280, Some("festive")));
        assert_eq!(result.text, input.text);
    }

    #[test]
    fn test_meta_description_trimmed() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("story").with_meta("Title", "d".repeat(300));
        let result = formatter.format(&input, &channel(280, None));
        assert_eq!(
            result.meta_description.as_ref().unwrap().chars().count(),
            200
        );
    }

    #[test]
    fn test_multibyte_truncation() {
        let formatter = ContentFormatter::new();
        let input = ContentPayload::new("지진".repeat(100)); // 200 chars
        let result = formatter.format(&input, &channel(50, None));
        assert_eq!(result.text.chars().count(), 50);
        assert!(result.text.ends_with("..."));
    }

    proptest! {
        #[test]
        fn prop_format_is_idempotent(text in ".{0,400}", limit in 10usize..300) {
            let formatter = ContentFormatter::new();
            let ch = channel(limit, Some("professional"));
            let input = ContentPayload::new(text);

            let once = formatter.format(&input, &ch);
            let twice = formatter.format(&once, &ch);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_truncation_law(text in ".{0,600}", limit in 4usize..300) {
            let result = truncate_chars(&text, limit);
            if text.chars().count() > limit {
                prop_assert_eq!(result.chars().count(), limit);
                prop_assert!(result.ends_with("..."));
            } else {
                prop_assert_eq!(result, text);
            }
        }
    }
}
