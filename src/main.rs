use clap::{Parser, Subcommand};
use genmeta::db::{AssetFilters, AssetSort};
use genmeta::index::{Freshness, IndexState, Indexer};
use genmeta::{compute_workflow_hash, hash_algorithm_info, Extractor, IndexConfig, IndexRoot};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genmeta")]
#[command(author, version, about = "Extract and index generation metadata from node-graph media outputs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Index database file
    #[arg(long, global = true, env = "GENMETA_DB", default_value = genmeta::config::DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Index roots as `type=path` (a bare path is an `output` root)
    #[arg(long = "root", global = true, env = "GENMETA_ROOTS", value_delimiter = ',')]
    roots: Vec<String>,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long, global = true, env = "GENMETA_JOBS")]
    jobs: Option<usize>,

    /// Never call ffprobe; video/audio files get no embedded metadata
    #[arg(long, global = true, env = "GENMETA_NO_FFPROBE")]
    no_ffprobe: bool,

    /// Only print results, no summary
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the roots, index changed files and drop vanished ones
    Index {
        /// Extra roots for this run (`type=path` or a bare path)
        roots: Vec<String>,
    },

    /// Reindex specific files
    Reindex {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Query the index (JSON output)
    Query {
        /// image, video or audio
        #[arg(long)]
        kind: Option<String>,

        /// Asset type (root name)
        #[arg(long = "type")]
        asset_type: Option<String>,

        #[arg(long)]
        subfolder: Option<String>,

        #[arg(long)]
        rating_min: Option<i32>,

        #[arg(long)]
        has_workflow: Option<bool>,

        #[arg(long)]
        workflow_hash: Option<String>,

        /// Required tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Full-text search over filename and prompts
        #[arg(long)]
        text: Option<String>,

        /// mtime_desc, mtime_asc, rating_desc, rating_asc, filename_asc, filename_desc
        #[arg(long)]
        sort: Option<AssetSort>,

        #[arg(long, default_value = "50")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Show index freshness and counters
    Status,

    /// List files that failed to index
    Errors {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Extract one file and print the result as JSON (no database)
    Extract {
        file: PathBuf,
    },

    /// Describe the workflow hash, or hash a workflow JSON file
    HashInfo {
        workflow: Option<PathBuf>,
    },

    /// Set an asset's rating (0-5)
    Rate {
        id: String,
        rating: u8,
    },

    /// Replace an asset's tags
    Tag {
        id: String,
        tags: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genmeta=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Extract { ref file } => run_extract(&args, file),
        Command::HashInfo { ref workflow } => run_hash_info(workflow.as_ref()),
        Command::Index { ref roots } => {
            let extra: Vec<IndexRoot> = roots.iter().map(|r| IndexRoot::parse(r)).collect();
            let indexer = open_indexer(&args, extra);
            run_index(&args, &indexer);
        }
        ref command => {
            let indexer = open_indexer(&args, Vec::new());
            handle_index_command(&args, &indexer, command);
        }
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
    std::process::exit(1);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(format!("cannot serialize output: {}", e)),
    }
}

fn open_indexer(args: &Args, extra: Vec<IndexRoot>) -> Indexer {
    let mut roots: Vec<IndexRoot> = args.roots.iter().map(|r| IndexRoot::parse(r)).collect();
    roots.extend(extra);
    for root in &mut roots {
        if let Ok(abs) = fs::canonicalize(&root.path) {
            root.path = abs;
        }
    }

    let config = IndexConfig::default()
        .with_roots(roots)
        .with_db_path(&args.db)
        .with_jobs(args.jobs)
        .with_ffprobe(!args.no_ffprobe);

    match Indexer::open(config) {
        Ok(indexer) => indexer,
        Err(e) => fail(format!("failed to open index {}: {}", args.db.display(), e)),
    }
}

fn run_index(args: &Args, indexer: &Indexer) {
    if indexer.config().roots.is_empty() {
        fail("no index roots given (pass `genmeta index <path>` or --root type=path)");
    }

    if !args.quiet {
        eprintln!("\x1b[1mgenmeta - generation metadata index\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        for root in &indexer.config().roots {
            eprintln!("  {:<10} {}", root.asset_type, root.path.display());
        }
        eprintln!();
    }

    let pb = if !args.quiet {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let result = indexer.reindex_all_with_progress(&|p| {
        if let Some(ref pb) = pb {
            pb.set_length(p.total as u64);
            pb.set_position(p.done as u64);
            if let Some(name) = p.path.file_name() {
                pb.set_message(name.to_string_lossy().to_string());
            }
        }
    });

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => fail(e),
    };

    if !args.quiet {
        eprintln!("{}", "─".repeat(70));
        eprintln!("\x1b[1mSummary:\x1b[0m");
        eprintln!("  \x1b[32m✓ Indexed:\x1b[0m   {}", summary.indexed);
        eprintln!("  \x1b[90m= Unchanged:\x1b[0m {}", summary.skipped);
        eprintln!("  \x1b[33m- Removed:\x1b[0m   {}", summary.deleted);
        if summary.errors > 0 {
            eprintln!("  \x1b[31m✗ Errors:\x1b[0m    {}  (see `genmeta errors`)", summary.errors);
        }
        if summary.cancelled {
            eprintln!("\n\x1b[33mIndexing was cancelled; removals skipped.\x1b[0m");
        }
    }

    if summary.errors > 0 {
        std::process::exit(1);
    }
}

fn run_extract(args: &Args, file: &PathBuf) {
    let extractor = Extractor::with_default_probe(!args.no_ffprobe, 0);
    match extractor.extract(file) {
        Ok(meta) => print_json(&*meta),
        Err(e) => fail(format!("{} ({})", e, e.reason_code())),
    }
}

fn run_hash_info(workflow: Option<&PathBuf>) {
    let Some(path) = workflow else {
        print_json(&hash_algorithm_info());
        return;
    };
    let text = fs::read_to_string(path).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
    let value: serde_json::Value =
        serde_json::from_str(&text).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
    match compute_workflow_hash(&value) {
        Some(hash) => println!("{}", hash),
        None => fail(format!("{} is not a workflow", path.display())),
    }
}

fn handle_index_command(args: &Args, indexer: &Indexer, command: &Command) {
    match command {
        Command::Reindex { paths } => {
            let paths: Vec<PathBuf> = paths
                .iter()
                .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
                .collect();
            match indexer.reindex_paths(&paths) {
                Ok(summary) => {
                    if !args.quiet {
                        eprintln!(
                            "\x1b[32mindexed {}\x1b[0m, unchanged {}, \x1b[31merrors {}\x1b[0m",
                            summary.indexed, summary.skipped, summary.errors
                        );
                    }
                    if summary.errors > 0 {
                        std::process::exit(1);
                    }
                }
                Err(e) => fail(e),
            }
        }

        Command::Query {
            kind,
            asset_type,
            subfolder,
            rating_min,
            has_workflow,
            workflow_hash,
            tags,
            text,
            sort,
            limit,
            offset,
        } => {
            let filters = AssetFilters {
                kind: kind.clone(),
                asset_type: asset_type.clone(),
                subfolder: subfolder.clone(),
                rating_min: *rating_min,
                has_workflow: *has_workflow,
                workflow_hash: workflow_hash.clone(),
                tags: tags.clone(),
            };
            match indexer
                .database()
                .query_assets(&filters, text.as_deref(), *sort, *limit, *offset)
            {
                Ok(page) => print_json(&page),
                Err(e) => fail(e),
            }
        }

        Command::Status => {
            let status = indexer.get_index_status().unwrap_or_else(|e| fail(e));
            if args.quiet {
                print_json(&status);
                return;
            }
            let state_color = match status.status {
                IndexState::Idle => "\x1b[32m",
                IndexState::Indexing => "\x1b[33m",
                IndexState::Error => "\x1b[31m",
            };
            let (fresh_color, fresh) = match status.freshness {
                Freshness::Fresh => ("\x1b[32m", "fresh"),
                Freshness::Stale => ("\x1b[33m", "stale"),
            };
            eprintln!("\x1b[1mIndex:\x1b[0m {}", args.db.display());
            eprintln!("{}", "─".repeat(70));
            eprintln!("  State:     {}{}\x1b[0m", state_color, status.status.as_str());
            eprintln!("  Freshness: {}{}\x1b[0m", fresh_color, fresh);
            eprintln!("  Assets:    {}", status.total_assets);
            eprintln!("  Backlog:   {}", status.backlog);
            eprintln!("  Errors:    {}", status.errors);
            eprintln!("  Schema:    {}", genmeta::CURRENT_SCHEMA);
        }

        Command::Errors { limit } => match indexer.database().list_indexing_errors(*limit) {
            Ok(errors) => {
                if errors.is_empty() {
                    println!("No indexing errors.");
                } else {
                    println!("{:<16} {:<26} {}", "REASON", "LAST ATTEMPT", "PATH");
                    println!("{}", "-".repeat(70));
                    for e in errors {
                        println!("{:<16} {:<26} {}", e.reason, truncate(&e.last_attempt_at, 25), e.path);
                    }
                }
            }
            Err(e) => fail(e),
        },

        Command::Rate { id, rating } => match indexer.set_rating(id, *rating) {
            Ok(()) => println!("Rated {} as {}", id, rating),
            Err(e) => fail(e),
        },

        Command::Tag { id, tags } => match indexer.set_tags(id, tags) {
            Ok(tags) => println!("Tagged {}: [{}]", id, tags.join(", ")),
            Err(e) => fail(e),
        },

        Command::Index { .. } | Command::Extract { .. } | Command::HashInfo { .. } => {}
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
