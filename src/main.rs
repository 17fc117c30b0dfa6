use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scene_index::utils::config::Settings;
use scene_index::{BuildMode, Catalog, Filters, MetadataRecord, ReadOutcome, Sampling};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Index database path (overrides SCENE_INDEX_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync the index with the sidecars under a directory
    Index {
        /// Collection directory (defaults to LIBRARY_ROOT)
        root: Option<PathBuf>,
        /// Clear the entries under the root and re-read every sidecar
        #[arg(long, conflicts_with = "prune")]
        rebuild: bool,
        /// Drop entries whose media file is gone
        #[arg(long)]
        prune: bool,
        /// Only the top-level directory
        #[arg(long)]
        no_recursive: bool,
    },
    /// Query the index
    Get(GetArgs),
    /// Entry counts per category
    Stats,
    /// Delete sidecars whose media file no longer exists
    Cleanup {
        root: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_recursive: bool,
    },
    /// Print the sidecar of one media file
    Show { path: PathBuf },
    /// Write metadata into the sidecar of a media file
    Annotate(AnnotateArgs),
    /// Set the pixel size of a media file, leaving other metadata alone
    Dimensions {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    /// Write a commented config file if none exists
    InitConfig,
}

#[derive(Args, Debug)]
struct GetArgs {
    #[arg(long)]
    mood: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long = "time")]
    time_of_day: Option<String>,
    #[arg(long)]
    screen: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    color: Option<String>,
    /// Substring of description, scene or tags
    #[arg(short, long)]
    query: Option<String>,
    #[arg(long)]
    min_width: Option<u32>,
    #[arg(long)]
    min_height: Option<u32>,

    /// Pick N random matches
    #[arg(short = 'R', long, value_name = "N", conflicts_with_all = ["one", "limit"])]
    random: Option<usize>,
    /// Pick one random match
    #[arg(short = '1', long, conflicts_with = "limit")]
    one: bool,
    /// First N matches in path order
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    /// Seed for the random picks
    #[arg(long)]
    seed: Option<u64>,

    /// Print only the paths
    #[arg(long)]
    paths_only: bool,
}

impl GetArgs {
    fn filters(&self) -> Filters {
        Filters {
            mood: self.mood.clone(),
            style: self.style.clone(),
            subject: self.subject.clone(),
            time_of_day: self.time_of_day.clone(),
            screen: self.screen.clone(),
            tag: self.tag.clone(),
            color: self.color.clone(),
            text: self.query.clone(),
            min_width: self.min_width,
            min_height: self.min_height,
        }
    }

    fn sampling(&self) -> Sampling {
        match (self.random, self.one, self.limit) {
            (Some(n), _, _) => Sampling::Random(n),
            (None, true, _) => Sampling::Single,
            (None, false, Some(n)) => Sampling::Limit(n),
            (None, false, None) => Sampling::All,
        }
    }
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    path: PathBuf,
    #[arg(long)]
    description: Option<String>,
    /// Repeatable; replaces the tag set when given
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    scene: Option<String>,
    #[arg(long)]
    mood: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long = "time")]
    time_of_day: Option<String>,
    #[arg(long)]
    colors: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    ai_model: Option<String>,
    /// Replace the whole sidecar instead of merging into it
    #[arg(long)]
    replace: bool,
}

impl AnnotateArgs {
    fn record(&self) -> MetadataRecord {
        let mut record = MetadataRecord::new().with_tags(&self.tags);
        record.description = self.description.clone();
        record.scene = self.scene.clone();
        record.mood = self.mood.clone();
        record.style = self.style.clone();
        record.subject = self.subject.clone();
        record.time_of_day = self.time_of_day.clone();
        record.colors = self.colors.clone();
        record.source = self.source.clone();
        record.ai_model = self.ai_model.clone();
        record
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::InitConfig = cli.command {
        return init_config();
    }

    let mut settings = Settings::load()?;
    if let Some(db) = cli.db.clone() {
        settings.db_path = db;
    }

    let mut catalog = Catalog::open(&settings.db_path)
        .with_context(|| format!("Failed to open index at {:?}", settings.db_path))?;
    if catalog.needs_rebuild() {
        warn!("Index was unreadable and has been reset; run `index --rebuild`");
    }

    run(&mut catalog, &settings, cli.command, cli.json)?;
    catalog.close()?;
    Ok(())
}

fn run(catalog: &mut Catalog, settings: &Settings, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Index {
            root,
            rebuild,
            prune,
            no_recursive,
        } => {
            let root = pick_root(root, settings)?;
            let mode = match (rebuild, prune) {
                (true, _) => BuildMode::Rebuild,
                (false, true) => BuildMode::Prune,
                (false, false) => BuildMode::Incremental,
            };
            let report =
                catalog.build_with_progress(&root, !no_recursive, mode, progress_bar(json)?)?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report);
            }
        }
        Command::Get(args) => {
            let mut rng = match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let entries = catalog.query(&args.filters(), args.sampling(), &mut rng)?;

            if json {
                print_json(&entries)?;
            } else {
                let mut out = io::stdout().lock();
                for entry in &entries {
                    writeln!(out, "{}", entry.path.display())?;
                    if !args.paths_only {
                        write_record(&mut out, &entry.record)?;
                    }
                }
            }
        }
        Command::Stats => {
            let stats = catalog.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Entries: {} ({} described)", stats.total, stats.with_description);
                for (title, counts) in [
                    ("Screen", &stats.by_screen),
                    ("Style", &stats.by_style),
                    ("Subject", &stats.by_subject),
                    ("Mood", &stats.by_mood),
                    ("Time of day", &stats.by_time_of_day),
                    ("Top tags", &stats.top_tags),
                    ("Top colors", &stats.top_colors),
                ] {
                    if counts.is_empty() {
                        continue;
                    }
                    println!("\n{}:", title);
                    for c in counts {
                        println!("  {:<24} {}", c.value, c.count);
                    }
                }
            }
        }
        Command::Cleanup {
            root,
            dry_run,
            no_recursive,
        } => {
            let root = pick_root(root, settings)?;
            let report = catalog.cleanup(&root, !no_recursive, dry_run)?;
            if json {
                print_json(&report)?;
            } else {
                let verb = if dry_run { "Would delete" } else { "Deleted" };
                for path in &report.deleted {
                    println!("{} {}", verb, path.display());
                }
                for (path, reason) in &report.failed {
                    println!("Failed {}: {}", path.display(), reason);
                }
                println!(
                    "{} {} sidecar(s), {} bytes",
                    verb,
                    report.deleted.len(),
                    report.bytes
                );
            }
        }
        Command::Show { path } => match catalog.read_metadata(&path)? {
            ReadOutcome::Absent => bail!("No sidecar for {:?}", path),
            ReadOutcome::Malformed(reason) => bail!("Malformed sidecar for {:?}: {}", path, reason),
            ReadOutcome::Found(doc) => {
                if json {
                    #[derive(Serialize)]
                    struct Shown<'a> {
                        #[serde(flatten)]
                        record: &'a MetadataRecord,
                        extra: &'a std::collections::BTreeMap<String, String>,
                    }
                    print_json(&Shown {
                        record: &doc.record,
                        extra: &doc.extra,
                    })?;
                } else {
                    let mut out = io::stdout().lock();
                    write_record(&mut out, &doc.record)?;
                    for (key, value) in &doc.extra {
                        writeln!(out, "  {}: {}", key, value)?;
                    }
                }
            }
        },
        Command::Annotate(args) => {
            let sidecar = catalog.put_metadata(&args.path, &args.record(), !args.replace)?;
            info!("Updated {:?}", sidecar);
            println!("{}", sidecar.display());
        }
        Command::Dimensions {
            path,
            width,
            height,
        } => {
            let record = catalog.update_dimensions(&path, width, height)?;
            if json {
                print_json(&record)?;
            } else {
                println!(
                    "{}x{} -> {}",
                    width,
                    height,
                    record.recommended_screen().unwrap_or("-")
                );
            }
        }
        Command::InitConfig => init_config()?,
    }
    Ok(())
}

fn init_config() -> Result<()> {
    let path = Settings::write_default()?;
    println!("{}", path.display());
    Ok(())
}

fn pick_root(root: Option<PathBuf>, settings: &Settings) -> Result<PathBuf> {
    root.or_else(|| settings.library_root.clone())
        .context("No directory given and LIBRARY_ROOT is not configured")
}

fn progress_bar(json: bool) -> Result<ProgressBar> {
    if json {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .context("Invalid progress template")?,
    );
    Ok(pb)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{}", text);
    Ok(())
}

fn write_record(out: &mut impl Write, record: &MetadataRecord) -> io::Result<()> {
    let fields = [
        ("description", record.description.as_deref()),
        ("scene", record.scene.as_deref()),
        ("mood", record.mood.as_deref()),
        ("style", record.style.as_deref()),
        ("subject", record.subject.as_deref()),
        ("time of day", record.time_of_day.as_deref()),
        ("colors", record.colors.as_deref()),
        ("screen", record.recommended_screen()),
        ("source", record.source.as_deref()),
        ("ai model", record.ai_model.as_deref()),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            writeln!(out, "  {}: {}", name, value)?;
        }
    }
    if let Some((w, h)) = record.dimensions() {
        writeln!(out, "  size: {}x{}", w, h)?;
    }
    if !record.tags().is_empty() {
        writeln!(out, "  tags: {}", record.tag_text())?;
    }
    Ok(())
}
