use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::schema::{ENTRY_COLUMNS, PRAGMAS, SCHEMA};
use crate::error::{Error, Result};
use crate::metadata::MetadataRecord;

/// One indexed media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub record: MetadataRecord,
    /// Signature of the sidecar content this row was built from.
    pub signature: String,
}

/// Persistent projection of sidecar metadata, one row per media file.
///
/// The store owns its SQLite connection; dropping it (or calling
/// [`close`](Self::close)) releases the file. Everything in it can be
/// rebuilt from sidecars, so a corrupt database file is moved aside and
/// replaced by an empty one on open.
pub struct IndexStore {
    conn: Connection,
    path: Option<PathBuf>,
    recovered: bool,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let mut recovered = false;
        let conn = match Self::connect(path) {
            Ok(conn) => conn,
            Err(Error::Store(e)) if is_corruption(&e) => {
                let mut aside = path.as_os_str().to_os_string();
                aside.push(".corrupt");
                warn!(
                    "Index at {:?} is unreadable ({}); moving it to {:?} and starting empty",
                    path, e, aside
                );
                fs::rename(path, &aside).map_err(|e| Error::io(path, e))?;
                recovered = true;
                Self::connect(path)?
            }
            Err(e) => return Err(e),
        };

        debug!("Opened index at {:?}", path);
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            recovered,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn,
            path: None,
            recovered: false,
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;
        Ok(conn)
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(PRAGMAS)?;
        conn.create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|s| s.to_lowercase()))
            },
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Store(e))
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True when open found an unreadable index and started over. The caller
    /// should run a rebuild.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    pub fn upsert(&mut self, entry: &IndexEntry) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(entry))
    }

    /// Writes all entries in one transaction.
    pub fn upsert_batch(&mut self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt_entry = tx.prepare(
                "INSERT INTO entries (path, description, scene, mood, style, subject, time_of_day,
                     colors, width, height, recommended_screen, source, ai_model, tag_text, signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(path) DO UPDATE SET
                     description = excluded.description,
                     scene = excluded.scene,
                     mood = excluded.mood,
                     style = excluded.style,
                     subject = excluded.subject,
                     time_of_day = excluded.time_of_day,
                     colors = excluded.colors,
                     width = excluded.width,
                     height = excluded.height,
                     recommended_screen = excluded.recommended_screen,
                     source = excluded.source,
                     ai_model = excluded.ai_model,
                     tag_text = excluded.tag_text,
                     signature = excluded.signature",
            )?;
            let mut stmt_clear_tags = tx.prepare("DELETE FROM entry_tags WHERE path = ?1")?;
            let mut stmt_tag =
                tx.prepare("INSERT OR IGNORE INTO entry_tags (path, tag) VALUES (?1, ?2)")?;
            let mut stmt_clear_colors = tx.prepare("DELETE FROM entry_colors WHERE path = ?1")?;
            let mut stmt_color =
                tx.prepare("INSERT OR IGNORE INTO entry_colors (path, color) VALUES (?1, ?2)")?;

            for entry in entries {
                let key = path_key(&entry.path)?;
                let r = &entry.record;
                stmt_entry.execute(params![
                    key,
                    r.description,
                    r.scene,
                    r.mood,
                    r.style,
                    r.subject,
                    r.time_of_day,
                    r.colors,
                    r.width(),
                    r.height(),
                    r.recommended_screen(),
                    r.source,
                    r.ai_model,
                    r.tag_text(),
                    entry.signature,
                ])?;

                stmt_clear_tags.execute(params![key])?;
                for tag in r.tags() {
                    stmt_tag.execute(params![key, tag])?;
                }
                stmt_clear_colors.execute(params![key])?;
                for color in color_names(r.colors.as_deref()) {
                    stmt_color.execute(params![key, color])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn remove(&mut self, path: &Path) -> Result<bool> {
        Ok(self.remove_batch(&[path.to_path_buf()])? == 1)
    }

    pub fn remove_batch(&mut self, paths: &[PathBuf]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM entries WHERE path = ?1")?;
            for path in paths {
                removed += stmt.execute(params![path_key(path)?])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn get(&self, path: &Path) -> Result<Option<IndexEntry>> {
        let sql = format!("SELECT {} FROM entries WHERE path = ?1", ENTRY_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![path_key(path)?], row_to_entry)
            .optional()?;
        match row {
            Some(entry) => Ok(Some(self.attach_tags(entry)?)),
            None => Ok(None),
        }
    }

    /// Every entry, ordered by path.
    pub fn all(&self) -> Result<Vec<IndexEntry>> {
        self.select_entries("1 = 1", &[], "ORDER BY path")
    }

    pub fn signature_of(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT signature FROM entries WHERE path = ?1",
                params![path_key(path)?],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Stored signatures of every entry below `root`.
    pub fn signatures_under(&self, root: &Path) -> Result<HashMap<PathBuf, String>> {
        let (lo, hi) = path_range(root)?;
        let mut stmt = self
            .conn
            .prepare("SELECT path, signature FROM entries WHERE path >= ?1 AND path < ?2")?;
        let rows = stmt.query_map(params![lo, hi], |row| {
            Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Paths of every entry below `root`, ordered.
    pub fn paths_under(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let (lo, hi) = path_range(root)?;
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM entries WHERE path >= ?1 AND path < ?2 ORDER BY path")?;
        let rows = stmt.query_map(params![lo, hi], |row| {
            row.get::<_, String>(0).map(PathBuf::from)
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Deletes every entry below `root`.
    pub fn clear_under(&mut self, root: &Path) -> Result<usize> {
        let (lo, hi) = path_range(root)?;
        let removed = self.conn.execute(
            "DELETE FROM entries WHERE path >= ?1 AND path < ?2",
            params![lo, hi],
        )?;
        info!("Cleared {} entries under {:?}", removed, root);
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `SELECT <entry columns> FROM entries WHERE <condition> <tail>`.
    pub(crate) fn select_entries(
        &self,
        condition: &str,
        values: &[Value],
        tail: &str,
    ) -> Result<Vec<IndexEntry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE {} {}",
            ENTRY_COLUMNS, condition, tail
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|e| self.attach_tags(e)).collect()
    }

    pub(crate) fn select_paths(&self, condition: &str, values: &[Value]) -> Result<Vec<PathBuf>> {
        let sql = format!("SELECT path FROM entries WHERE {} ORDER BY path", condition);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            row.get::<_, String>(0).map(PathBuf::from)
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn attach_tags(&self, mut entry: IndexEntry) -> Result<IndexEntry> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT tag FROM entry_tags WHERE path = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![path_key(&entry.path)?], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        entry.record.set_tags(tags);
        Ok(entry)
    }
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
    )
}

/// Index key of a path. Keys must round-trip exactly, so names that are
/// not UTF-8 are refused rather than stored lossily.
pub(crate) fn path_key(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
}

/// Half-open range `[lo, hi)` of path keys strictly below `root`.
pub(crate) fn path_range(root: &Path) -> Result<(String, String)> {
    let mut lo = path_key(root)?.to_string();
    if !lo.ends_with(MAIN_SEPARATOR) {
        lo.push(MAIN_SEPARATOR);
    }
    let mut hi = lo.clone();
    hi.pop();
    hi.push((MAIN_SEPARATOR as u8 + 1) as char);
    Ok((lo, hi))
}

/// Individual colors of the free-text `colors` field, for statistics.
fn color_names(colors: Option<&str>) -> impl Iterator<Item = String> + '_ {
    colors
        .unwrap_or("")
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
}

/// Maps an `ENTRY_COLUMNS` row. Tags are attached separately.
fn row_to_entry(row: &Row) -> rusqlite::Result<IndexEntry> {
    let mut record = MetadataRecord::new();
    record.description = row.get(1)?;
    record.scene = row.get(2)?;
    record.mood = row.get(3)?;
    record.style = row.get(4)?;
    record.subject = row.get(5)?;
    record.time_of_day = row.get(6)?;
    record.colors = row.get(7)?;
    record.source = row.get(10)?;
    record.ai_model = row.get(11)?;
    let width: Option<u32> = row.get(8)?;
    let height: Option<u32> = row.get(9)?;
    if let Some((w, h)) = width.zip(height) {
        record
            .set_dimensions(w, h)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Integer, Box::new(e)))?;
    }

    Ok(IndexEntry {
        path: PathBuf::from(row.get::<_, String>(0)?),
        record,
        signature: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, tags: &[&str], sig: &str) -> IndexEntry {
        let mut record = MetadataRecord::new().with_tags(tags.iter().copied());
        record.description = Some(format!("image at {}", path));
        IndexEntry {
            path: PathBuf::from(path),
            record,
            signature: sig.to_string(),
        }
    }

    #[test]
    fn test_upsert_get_and_update() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        let mut first = entry("/w/a.jpg", &["sea", "sky"], "s1");
        first.record.set_dimensions(3840, 2160)?;
        store.upsert(&first)?;

        assert_eq!(store.get(Path::new("/w/a.jpg"))?, Some(first.clone()));
        assert_eq!(store.signature_of(Path::new("/w/a.jpg"))?.as_deref(), Some("s1"));

        let second = entry("/w/a.jpg", &["storm"], "s2");
        store.upsert(&second)?;
        let got = store.get(Path::new("/w/a.jpg"))?.unwrap();
        assert_eq!(got, second);
        assert_eq!(got.record.dimensions(), None);
        assert_eq!(store.len()?, 1);
        Ok(())
    }

    #[test]
    fn test_remove_cascades_tags() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        store.upsert(&entry("/w/a.jpg", &["sea"], "s1"))?;

        assert!(store.remove(Path::new("/w/a.jpg"))?);
        assert!(!store.remove(Path::new("/w/a.jpg"))?);
        assert_eq!(store.get(Path::new("/w/a.jpg"))?, None);

        let orphan_tags: i64 =
            store
                .conn()
                .query_row("SELECT COUNT(*) FROM entry_tags", [], |row| row.get(0))?;
        assert_eq!(orphan_tags, 0);
        Ok(())
    }

    #[test]
    fn test_all_is_ordered_by_path() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        store.upsert_batch(&[
            entry("/w/c.jpg", &[], "c"),
            entry("/w/a.jpg", &[], "a"),
            entry("/w/b.jpg", &[], "b"),
        ])?;
        let paths: Vec<_> = store.all()?.into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/w/a.jpg"),
                PathBuf::from("/w/b.jpg"),
                PathBuf::from("/w/c.jpg")
            ]
        );
        Ok(())
    }

    #[test]
    fn test_root_scoping() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        store.upsert_batch(&[
            entry("/w/a.jpg", &[], "1"),
            entry("/w/sub/b.jpg", &[], "2"),
            entry("/walls/c.jpg", &[], "3"),
            entry("/w0.jpg", &[], "4"),
        ])?;

        assert_eq!(
            store.paths_under(Path::new("/w"))?,
            vec![PathBuf::from("/w/a.jpg"), PathBuf::from("/w/sub/b.jpg")]
        );
        assert_eq!(store.signatures_under(Path::new("/w/"))?.len(), 2);

        assert_eq!(store.clear_under(Path::new("/w"))?, 2);
        assert_eq!(store.len()?, 2);
        assert!(store.get(Path::new("/walls/c.jpg"))?.is_some());
        Ok(())
    }

    #[test]
    fn test_path_range_bounds() -> Result<()> {
        assert_eq!(
            path_range(Path::new("/w"))?,
            ("/w/".to_string(), "/w0".to_string())
        );
        assert_eq!(path_range(Path::new("/"))?, ("/".to_string(), "0".to_string()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_are_refused() -> Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut store = IndexStore::open_in_memory()?;
        let path = Path::new("/w").join(OsStr::from_bytes(b"caf\xe9.jpg"));
        let mut bad = entry("/w/x.jpg", &[], "s");
        bad.path = path.clone();

        assert!(matches!(store.upsert(&bad), Err(Error::NonUtf8Path(_))));
        assert!(matches!(store.get(&path), Err(Error::NonUtf8Path(_))));
        assert!(store.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_invalid_stored_dimensions_surface() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        store.upsert(&entry("/w/a.jpg", &[], "s1"))?;
        store
            .conn()
            .execute("UPDATE entries SET width = 0, height = 1080", [])?;

        assert!(matches!(store.get(Path::new("/w/a.jpg")), Err(Error::Store(_))));
        assert!(store.all().is_err());
        Ok(())
    }

    #[test]
    fn test_colors_are_split_for_stats() -> Result<()> {
        let mut store = IndexStore::open_in_memory()?;
        let mut e = entry("/w/a.jpg", &[], "s1");
        e.record.colors = Some("Deep Blue, grey ,, blue".into());
        store.upsert(&e)?;
        e.record.colors = Some("grey".into());
        store.upsert(&e)?;

        let colors: Vec<String> = store
            .conn()
            .prepare("SELECT color FROM entry_colors ORDER BY color")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        assert_eq!(colors, vec!["grey".to_string()]);
        Ok(())
    }

    #[test]
    fn test_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("index.db");

        let mut store = IndexStore::open(&db)?;
        store.upsert(&entry("/w/a.jpg", &["sea"], "s1"))?;
        store.close()?;

        let store = IndexStore::open(&db)?;
        assert!(!store.recovered_from_corruption());
        assert_eq!(store.len()?, 1);
        assert!(store.get(Path::new("/w/a.jpg"))?.unwrap().record.has_tag("sea"));
        Ok(())
    }

    #[test]
    fn test_corrupt_index_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        fs::write(&db, vec![0x42u8; 4096]).unwrap();

        let store = IndexStore::open(&db)?;
        assert!(store.recovered_from_corruption());
        assert!(store.is_empty()?);
        assert!(dir.path().join("index.db.corrupt").exists());
        Ok(())
    }
}
