use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

pub const APP_NAME: &str = "scene-index";

const DB_ENV: &str = "SCENE_INDEX_DB";
const ROOT_ENV: &str = "SCENE_INDEX_ROOT";

/// Where the index lives and which collection to use by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub library_root: Option<PathBuf>,
}

/// Values read from the config file. Absent keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FileSettings {
    db_path: Option<PathBuf>,
    library_root: Option<PathBuf>,
}

impl Settings {
    /// Resolves settings from the environment, then the config file, then
    /// built-in defaults.
    pub fn load() -> Result<Self> {
        let file = match config_path() {
            Some(path) if path.exists() => {
                debug!("Reading settings from {:?}", path);
                load_from_file(&path)?
            }
            _ => FileSettings::default(),
        };

        Ok(Self::resolve(
            std::env::var_os(DB_ENV).map(PathBuf::from),
            std::env::var_os(ROOT_ENV).map(PathBuf::from),
            file,
        ))
    }

    fn resolve(db_env: Option<PathBuf>, root_env: Option<PathBuf>, file: FileSettings) -> Self {
        Self {
            db_path: db_env
                .or(file.db_path)
                .unwrap_or_else(default_db_path),
            library_root: root_env.or(file.library_root),
        }
    }

    /// Writes a commented template unless a config file already exists.
    /// Returns the config file path.
    pub fn write_default() -> Result<PathBuf> {
        let path = config_path().context("Could not determine the user config directory")?;
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        save_template(&path, &default_db_path())?;
        info!("Wrote default settings to {:?}", path);
        Ok(path)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.env"))
}

/// `<data dir>/scene-index/index.db`, outside any media tree.
pub fn default_db_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join(APP_NAME).join("index.db"),
        None => PathBuf::from(format!("{}.db", APP_NAME)),
    }
}

fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

fn load_from_file(path: &Path) -> Result<FileSettings> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut settings = FileSettings::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "DB_PATH" => settings.db_path = Some(expand_home(value)),
                "LIBRARY_ROOT" => settings.library_root = Some(expand_home(value)),
                _ => {}
            }
        }
    }

    Ok(settings)
}

fn save_template(path: &Path, db_path: &Path) -> Result<()> {
    let mut file = File::create(path).context("Failed to create config file")?;
    writeln!(file, "# {} settings", APP_NAME)?;
    writeln!(file, "#")?;
    writeln!(file, "# Index database (disposable, rebuilt from sidecars)")?;
    writeln!(file, "DB_PATH={}", db_path.display())?;
    writeln!(file, "#")?;
    writeln!(file, "# Default collection directory")?;
    writeln!(file, "# LIBRARY_ROOT=~/wallpapers")?;
    Ok(())
}
