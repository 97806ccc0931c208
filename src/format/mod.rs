//! Notification formatting.
//!
//! A formatter turns a payload into one logical [`Notification`]. The
//! notification is then split into [`NotificationChunk`]s that each respect
//! the platform's [`PlatformLimits`]:
//!
//! - at most `max_fields` fields per chunk, so `n` fields always produce
//!   `max(1, ceil(n / max_fields))` chunks;
//! - the description and links ride on the first chunk only, later chunks
//!   carry a ` (continued)` marker in the title;
//! - every text is truncated to its per-field character limit with a `...`
//!   marker.

pub mod events;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::webhooks::FormatterId;

/// Placeholder for optional payload data that is missing.
pub const UNKNOWN: &str = "unknown";

/// Appended to truncated text.
pub const ELLIPSIS: &str = "...";

/// Appended to the title of every chunk after the first.
pub const CONTINUED: &str = " (continued)";

/// Discord rejects empty field names and values; this renders as nothing.
const BLANK: &str = "\u{200b}";

/// Notification accent colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Green,
    Red,
    Orange,
    Blue,
    Grey,
    Gold,
}

impl Color {
    pub fn rgb(&self) -> u32 {
        match self {
            Color::Green => 0x2ecc71,
            Color::Red => 0xe74c3c,
            Color::Orange => 0xe67e22,
            Color::Blue => 0x3498db,
            Color::Grey => 0x979c9f,
            Color::Gold => 0xf1c40f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Per-message limits of the destination platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    pub max_fields: usize,
    pub title: usize,
    pub description: usize,
    pub field_name: usize,
    pub field_value: usize,
}

impl PlatformLimits {
    /// Discord's embed limits.
    pub const DISCORD: PlatformLimits = PlatformLimits {
        max_fields: 25,
        title: 256,
        description: 4096,
        field_name: 256,
        field_value: 1024,
    };

    pub fn with_max_fields(mut self, max_fields: usize) -> Self {
        self.max_fields = max_fields.max(1);
        self
    }
}

impl Default for PlatformLimits {
    fn default() -> Self {
        PlatformLimits::DISCORD
    }
}

/// A formatted notification before splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: Option<String>,
    pub color: Color,
    pub fields: Vec<Field>,
    pub links: Vec<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, color: Color) -> Self {
        Notification {
            title: title.into(),
            description: None,
            color,
            fields: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a link; empty URLs are ignored.
    pub fn link(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.is_empty() {
            self.links.push(url);
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    /// Splits into platform-sized chunks. Always returns at least one chunk.
    pub fn into_chunks(self, limits: &PlatformLimits) -> Vec<NotificationChunk> {
        let max_fields = limits.max_fields.max(1);
        let title = truncate(&self.title, limits.title);
        let continued_title = format!(
            "{}{CONTINUED}",
            truncate(&self.title, limits.title.saturating_sub(CONTINUED.len()))
        );
        let description = self
            .description
            .as_deref()
            .map(|d| truncate(d, limits.description));

        let fields: Vec<Field> = self
            .fields
            .into_iter()
            .map(|f| Field {
                name: non_blank(truncate(&f.name, limits.field_name)),
                value: non_blank(truncate(&f.value, limits.field_value)),
                inline: f.inline,
            })
            .collect();

        let mut groups: Vec<Vec<Field>> = Vec::new();
        let mut current = Vec::with_capacity(max_fields);
        for field in fields {
            if current.len() == max_fields {
                groups.push(std::mem::take(&mut current));
            }
            current.push(field);
        }
        groups.push(current);

        groups
            .into_iter()
            .enumerate()
            .map(|(index, fields)| {
                if index == 0 {
                    NotificationChunk {
                        title: title.clone(),
                        description: description.clone(),
                        color: self.color,
                        fields,
                        links: self.links.clone(),
                    }
                } else {
                    NotificationChunk {
                        title: continued_title.clone(),
                        description: None,
                        color: self.color,
                        fields,
                        links: Vec::new(),
                    }
                }
            })
            .collect()
    }
}

/// One independently sendable piece of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChunk {
    pub title: String,
    pub description: Option<String>,
    pub color: Color,
    pub fields: Vec<Field>,
    pub links: Vec<String>,
}

impl NotificationChunk {
    /// A plain text chunk, used for diagnostics posted to bot-logs.
    pub fn notice(title: impl Into<String>, description: impl Into<String>) -> Self {
        let limits = PlatformLimits::DISCORD;
        NotificationChunk {
            title: truncate(&title.into(), limits.title),
            description: Some(truncate(&description.into(), limits.description)),
            color: Color::Red,
            fields: Vec::new(),
            links: Vec::new(),
        }
    }
}

/// Truncates `text` to at most `max` characters, ending with [`ELLIPSIS`]
/// when anything was cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }
    let kept: String = text.chars().take(max - ELLIPSIS.len()).collect();
    format!("{kept}{ELLIPSIS}")
}

fn non_blank(text: String) -> String {
    if text.trim().is_empty() {
        BLANK.to_string()
    } else {
        text
    }
}

/// Renders and splits an event.
pub fn format(
    formatter: FormatterId,
    event_type: &str,
    payload: &Value,
    limits: &PlatformLimits,
) -> Vec<NotificationChunk> {
    events::render(formatter, event_type, payload).into_chunks(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_fields(n: usize) -> Notification {
        (0..n).fold(
            Notification::new("Title", Color::Blue)
                .description("desc")
                .link("https://example.com"),
            |note, i| note.field(format!("f{i}"), "v", true),
        )
    }

    fn field_counts(n: usize) -> Vec<usize> {
        with_fields(n)
            .into_chunks(&PlatformLimits::DISCORD)
            .iter()
            .map(|c| c.fields.len())
            .collect()
    }

    // ─── Chunk split boundaries ───

    #[test]
    fn split_boundaries() {
        assert_eq!(field_counts(0), vec![0]);
        assert_eq!(field_counts(25), vec![25]);
        assert_eq!(field_counts(26), vec![25, 1]);
        assert_eq!(field_counts(50), vec![25, 25]);
        assert_eq!(field_counts(51), vec![25, 25, 1]);
    }

    #[test]
    fn shared_content_only_on_first_chunk() {
        let chunks = with_fields(30).into_chunks(&PlatformLimits::DISCORD);
        assert_eq!(chunks[0].title, "Title");
        assert_eq!(chunks[0].description.as_deref(), Some("desc"));
        assert_eq!(chunks[0].links, vec!["https://example.com".to_string()]);

        assert_eq!(chunks[1].title, "Title (continued)");
        assert_eq!(chunks[1].description, None);
        assert!(chunks[1].links.is_empty());
        assert_eq!(chunks[1].color, Color::Blue);
    }

    #[test]
    fn field_order_is_preserved_across_chunks() {
        let chunks = with_fields(27).into_chunks(&PlatformLimits::DISCORD);
        let names: Vec<_> = chunks
            .iter()
            .flat_map(|c| c.fields.iter().map(|f| f.name.clone()))
            .collect();
        let expected: Vec<_> = (0..27).map(|i| format!("f{i}")).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn custom_field_limit() {
        let limits = PlatformLimits::DISCORD.with_max_fields(10);
        let counts: Vec<_> = with_fields(21)
            .into_chunks(&limits)
            .iter()
            .map(|c| c.fields.len())
            .collect();
        assert_eq!(counts, vec![10, 10, 1]);
    }

    // ─── Truncation ───

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hello", 2), "he");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate("ééééé", 5), "ééééé");
        assert_eq!(truncate("éééééé", 5), "éé...");
    }

    #[test]
    fn long_texts_fit_limits() {
        let chunks = Notification::new("t".repeat(400), Color::Red)
            .description("d".repeat(5000))
            .field("n".repeat(300), "v".repeat(2000), false)
            .field("more", "x", false)
            .into_chunks(&PlatformLimits::DISCORD.with_max_fields(1));

        let first = &chunks[0];
        assert_eq!(first.title.chars().count(), 256);
        assert!(first.title.ends_with(ELLIPSIS));
        assert_eq!(first.description.as_ref().map(|d| d.chars().count()), Some(4096));
        assert_eq!(first.fields[0].name.chars().count(), 256);
        assert_eq!(first.fields[0].value.chars().count(), 1024);
        assert!(chunks[1].title.chars().count() <= 256);
        assert!(chunks[1].title.ends_with(CONTINUED));
    }

    #[test]
    fn empty_field_text_is_replaced() {
        let chunks = Notification::new("t", Color::Grey)
            .field("", "   ", false)
            .into_chunks(&PlatformLimits::DISCORD);
        assert_eq!(chunks[0].fields[0].name, BLANK);
        assert_eq!(chunks[0].fields[0].value, BLANK);
    }

    proptest! {
        #[test]
        fn chunk_count_is_ceiling(n in 0usize..200) {
            let chunks = with_fields(n).into_chunks(&PlatformLimits::DISCORD);
            prop_assert_eq!(chunks.len(), n.div_ceil(25).max(1));
            prop_assert!(chunks.iter().all(|c| c.fields.len() <= 25));
            prop_assert_eq!(chunks.iter().map(|c| c.fields.len()).sum::<usize>(), n);
        }

        #[test]
        fn truncate_never_exceeds(text in ".{0,64}", max in 0usize..40) {
            prop_assert!(truncate(&text, max).chars().count() <= max);
        }
    }
}
