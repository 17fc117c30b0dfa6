//! Filtered lookups and random sampling over the index.
//!
//! Every filter is optional and all supplied filters must hold. Text
//! comparisons ignore case. Filtering runs inside SQLite so only matching
//! rows are materialised; random sampling only loads the matching paths
//! before picking.

use rand::Rng;
use rusqlite::types::Value;
use serde::Serialize;

use crate::database::repo::{IndexEntry, IndexStore};
use crate::error::Result;
use crate::metadata::{normalize_tag, MetadataRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    pub mood: Option<String>,
    pub style: Option<String>,
    pub subject: Option<String>,
    pub time_of_day: Option<String>,
    pub screen: Option<String>,
    pub tag: Option<String>,
    /// Substring of the free-text `colors` field.
    pub color: Option<String>,
    /// Substring of description, scene or the joined tag list.
    pub text: Option<String>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
}

/// How matches are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sampling {
    /// Every match, ascending by path.
    #[default]
    All,
    /// The first `n` matches by path.
    Limit(usize),
    /// `min(n, matches)` distinct matches picked uniformly.
    Random(usize),
    /// One random match, or nothing when there are no matches.
    Single,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_time_of_day(mut self, time_of_day: impl Into<String>) -> Self {
        self.time_of_day = Some(time_of_day.into());
        self
    }

    pub fn with_screen(mut self, screen: impl Into<String>) -> Self {
        self.screen = Some(screen.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_min_width(mut self, width: u32) -> Self {
        self.min_width = Some(width);
        self
    }

    pub fn with_min_height(mut self, height: u32) -> Self {
        self.min_height = Some(height);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluates the filters against a single record, with the same
    /// semantics as the SQL path.
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        fn exact(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match (wanted, actual) {
                (None, _) => true,
                (Some(w), Some(a)) => a.to_lowercase() == w.to_lowercase(),
                (Some(_), None) => false,
            }
        }
        fn contains(haystack: Option<&str>, needle: &str) -> bool {
            haystack.map_or(false, |h| h.to_lowercase().contains(needle))
        }

        if !exact(&self.mood, &record.mood)
            || !exact(&self.style, &record.style)
            || !exact(&self.subject, &record.subject)
            || !exact(&self.time_of_day, &record.time_of_day)
            || !exact(&self.screen, &record.recommended_screen().map(str::to_string))
        {
            return false;
        }

        if let Some(tag) = &self.tag {
            match normalize_tag(tag) {
                Some(tag) if record.tags().contains(&tag) => {}
                _ => return false,
            }
        }

        if let Some(color) = &self.color {
            if !contains(record.colors.as_deref(), &color.to_lowercase()) {
                return false;
            }
        }

        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let tag_text = record.tag_text();
            if !contains(Some(record.description.as_deref().unwrap_or("")), &needle)
                && !contains(Some(record.scene.as_deref().unwrap_or("")), &needle)
                && !contains(Some(&tag_text), &needle)
            {
                return false;
            }
        }

        if let Some(min) = self.min_width {
            if record.width().map_or(true, |w| w < min) {
                return false;
            }
        }
        if let Some(min) = self.min_height {
            if record.height().map_or(true, |h| h < min) {
                return false;
            }
        }

        true
    }

    /// WHERE clause over `entries` plus its positional parameters.
    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let exact = [
            ("mood", &self.mood),
            ("style", &self.style),
            ("subject", &self.subject),
            ("time_of_day", &self.time_of_day),
            ("recommended_screen", &self.screen),
        ];
        for (column, wanted) in exact {
            if let Some(wanted) = wanted {
                values.push(Value::Text(wanted.to_lowercase()));
                conditions.push(format!("casefold({}) = ?{}", column, values.len()));
            }
        }

        if let Some(tag) = &self.tag {
            match normalize_tag(tag) {
                Some(tag) => {
                    values.push(Value::Text(tag));
                    conditions.push(format!(
                        "EXISTS (SELECT 1 FROM entry_tags t WHERE t.path = entries.path AND t.tag = ?{})",
                        values.len()
                    ));
                }
                None => conditions.push("0 = 1".to_string()),
            }
        }

        if let Some(color) = &self.color {
            values.push(Value::Text(color.to_lowercase()));
            conditions.push(format!(
                "(colors IS NOT NULL AND instr(casefold(colors), ?{}) > 0)",
                values.len()
            ));
        }

        if let Some(text) = &self.text {
            values.push(Value::Text(text.to_lowercase()));
            let n = values.len();
            conditions.push(format!(
                "(instr(casefold(coalesce(description, '')), ?{n}) > 0 \
                  OR instr(casefold(coalesce(scene, '')), ?{n}) > 0 \
                  OR instr(tag_text, ?{n}) > 0)"
            ));
        }

        if let Some(min) = self.min_width {
            values.push(Value::Integer(min as i64));
            conditions.push(format!("(width IS NOT NULL AND width >= ?{})", values.len()));
        }
        if let Some(min) = self.min_height {
            values.push(Value::Integer(min as i64));
            conditions.push(format!("(height IS NOT NULL AND height >= ?{})", values.len()));
        }

        if conditions.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (conditions.join(" AND "), values)
        }
    }
}

impl IndexStore {
    /// Runs `filters` and returns matches according to `sampling`. `rng` is
    /// only drawn from by the random modes.
    pub fn query<R: Rng + ?Sized>(
        &self,
        filters: &Filters,
        sampling: Sampling,
        rng: &mut R,
    ) -> Result<Vec<IndexEntry>> {
        let (condition, values) = filters.to_sql();
        match sampling {
            Sampling::All => self.select_entries(&condition, &values, "ORDER BY path"),
            Sampling::Limit(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                self.select_entries(&condition, &values, &format!("ORDER BY path LIMIT {}", n))
            }
            Sampling::Random(n) => self.sample(&condition, &values, n, rng),
            Sampling::Single => self.sample(&condition, &values, 1, rng),
        }
    }

    /// Every match in path order.
    pub fn find(&self, filters: &Filters) -> Result<Vec<IndexEntry>> {
        let (condition, values) = filters.to_sql();
        self.select_entries(&condition, &values, "ORDER BY path")
    }

    pub fn count(&self, filters: &Filters) -> Result<usize> {
        let (condition, values) = filters.to_sql();
        let sql = format!("SELECT COUNT(*) FROM entries WHERE {}", condition);
        let count: i64 = self.conn().query_row(
            &sql,
            rusqlite::params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        condition: &str,
        values: &[Value],
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<IndexEntry>> {
        let paths = self.select_paths(condition, values)?;
        let amount = n.min(paths.len());
        let picked = rand::seq::index::sample(rng, paths.len(), amount);

        let mut entries = Vec::with_capacity(amount);
        for i in picked.iter() {
            if let Some(entry) = self.get(&paths[i])? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
