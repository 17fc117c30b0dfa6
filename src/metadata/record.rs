use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::metadata::screen;

/// Descriptive metadata for one media file.
///
/// Tags are kept normalised (trimmed, lowercase, deduplicated). Width and
/// height are set together, and the recommended screen is always derived
/// from them, so a record can never carry a stale or half-known resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommended_screen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
}

/// Trims and lowercases a tag. Blank tags are dropped.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_lowercase())
    }
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        normalize_tag(tag).map_or(false, |t| self.tags.contains(&t))
    }

    pub fn add_tag(&mut self, tag: &str) {
        if let Some(tag) = normalize_tag(tag) {
            self.tags.insert(tag);
        }
    }

    /// Replaces the tag set.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .filter_map(|t| normalize_tag(t.as_ref()))
            .collect();
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_tags(tags);
        self
    }

    /// Tags joined by a single space, in sorted order.
    pub fn tag_text(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    pub fn recommended_screen(&self) -> Option<&str> {
        self.recommended_screen.as_deref()
    }

    /// Sets both dimensions and re-derives the recommended screen.
    pub fn set_dimensions(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        self.width = Some(width);
        self.height = Some(height);
        self.recommended_screen = screen::recommend(width, height).map(str::to_string);
        Ok(())
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Result<Self> {
        self.set_dimensions(width, height)?;
        Ok(self)
    }

    pub fn clear_dimensions(&mut self) {
        self.width = None;
        self.height = None;
        self.recommended_screen = None;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies a partial update: every field present in `patch` overwrites
    /// this record's value, a non-empty tag set replaces the current one,
    /// absent fields are left alone.
    pub fn merge_from(&mut self, patch: &MetadataRecord) {
        fn take(dst: &mut Option<String>, src: &Option<String>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }

        take(&mut self.description, &patch.description);
        take(&mut self.scene, &patch.scene);
        take(&mut self.mood, &patch.mood);
        take(&mut self.style, &patch.style);
        take(&mut self.subject, &patch.subject);
        take(&mut self.time_of_day, &patch.time_of_day);
        take(&mut self.colors, &patch.colors);
        take(&mut self.source, &patch.source);
        take(&mut self.ai_model, &patch.ai_model);

        if !patch.tags.is_empty() {
            self.tags.clone_from(&patch.tags);
        }
        if patch.dimensions().is_some() {
            self.width = patch.width;
            self.height = patch.height;
            self.recommended_screen.clone_from(&patch.recommended_screen);
        }
    }
}
