use serde::Serialize;

use crate::database::repo::IndexStore;
use crate::error::Result;

const TOP_TAGS: usize = 20;
const TOP_MOODS: usize = 10;
const TOP_COLORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

/// Collection overview, each breakdown ordered by count then value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total: usize,
    pub with_description: usize,
    pub by_screen: Vec<CategoryCount>,
    pub by_style: Vec<CategoryCount>,
    pub by_subject: Vec<CategoryCount>,
    pub by_mood: Vec<CategoryCount>,
    pub by_time_of_day: Vec<CategoryCount>,
    pub top_tags: Vec<CategoryCount>,
    /// Single colors split out of the `colors` field.
    pub top_colors: Vec<CategoryCount>,
}

impl IndexStore {
    pub fn stats(&self) -> Result<IndexStats> {
        let with_description: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM entries WHERE description IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(IndexStats {
            total: self.len()?,
            with_description: with_description as usize,
            by_screen: self.group_counts("entries", "recommended_screen", None)?,
            by_style: self.group_counts("entries", "style", None)?,
            by_subject: self.group_counts("entries", "subject", None)?,
            by_mood: self.group_counts("entries", "mood", Some(TOP_MOODS))?,
            by_time_of_day: self.group_counts("entries", "time_of_day", None)?,
            top_tags: self.group_counts("entry_tags", "tag", Some(TOP_TAGS))?,
            top_colors: self.group_counts("entry_colors", "color", Some(TOP_COLORS))?,
        })
    }

    fn group_counts(
        &self,
        table: &str,
        column: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryCount>> {
        let mut sql = format!(
            "SELECT {col}, COUNT(*) AS n FROM {table} WHERE {col} IS NOT NULL \
             GROUP BY {col} ORDER BY n DESC, {col} ASC",
            col = column,
            table = table
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(CategoryCount {
                value: row.get(0)?,
                count: row.get::<_, i64>(1)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
