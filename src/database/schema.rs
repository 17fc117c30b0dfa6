pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        path TEXT PRIMARY KEY NOT NULL,
        description TEXT,
        scene TEXT,
        mood TEXT,
        style TEXT,
        subject TEXT,
        time_of_day TEXT,
        colors TEXT,
        width INTEGER,
        height INTEGER,
        recommended_screen TEXT,
        source TEXT,
        ai_model TEXT,
        tag_text TEXT NOT NULL DEFAULT '',
        signature TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entry_tags (
        path TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY(path, tag),
        FOREIGN KEY(path) REFERENCES entries(path) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS entry_colors (
        path TEXT NOT NULL,
        color TEXT NOT NULL,
        PRIMARY KEY(path, color),
        FOREIGN KEY(path) REFERENCES entries(path) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags(tag);
    CREATE INDEX IF NOT EXISTS idx_entry_colors_color ON entry_colors(color);
    CREATE INDEX IF NOT EXISTS idx_entries_screen ON entries(recommended_screen);
    CREATE INDEX IF NOT EXISTS idx_entries_width ON entries(width);
    CREATE INDEX IF NOT EXISTS idx_entries_height ON entries(height);
";

pub const PRAGMAS: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;
";

/// Columns read back into an `IndexEntry`, in row order.
pub const ENTRY_COLUMNS: &str = "path, description, scene, mood, style, subject, time_of_day, \
     colors, width, height, source, ai_model, signature";
