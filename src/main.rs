//! # Kontext CLI (`ctx`)
//!
//! The `ctx` binary indexes a source tree and queries the index.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctx init [path]` | Create `.ctx/` and build the index |
//! | `ctx update` | Incrementally re-index changed files |
//! | `ctx find "<query>"` | Hybrid search across all strategies |
//! | `ctx symbols` | Structural lookup by name, type, parent |
//! | `ctx deps <file>` | Import trace (`--reverse` for importers) |
//! | `ctx chunk <file:line>` | Show the chunk containing a location |
//! | `ctx status` | Index statistics |
//! | `ctx watch` | Keep the index fresh while files change |
//! | `ctx config show\|set` | Inspect or edit `.ctx/config.toml` |
//!
//! ## Examples
//!
//! ```bash
//! ctx init ~/src/api
//! ctx find "who imports src/db.ts" --root ~/src/api
//! ctx symbols --type method --parent AuthService
//! ctx chunk src/auth.ts:14
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use kontext::config;
use kontext::index_cmd::{self, IndexOptions};
use kontext::indexer::Indexer;
use kontext::progress::ProgressMode;
use kontext::query::{self, FindOptions, SymbolOptions};
use kontext::status;
use kontext::watcher::IndexWatcher;
use kontext_core::models::{Language, NodeKind};
use kontext_core::store::MatchMode;

/// Kontext: a local code-context engine.
///
/// Indexes a source tree into `<root>/.ctx/index.db` and answers
/// structural and natural-language queries against it.
#[derive(Parser)]
#[command(
    name = "ctx",
    about = "Kontext: structural indexing and hybrid retrieval for source trees",
    version
)]
struct Cli {
    /// Root of the source tree. The index lives in `<root>/.ctx/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log progress at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create `.ctx/` with a default config and build the index.
    ///
    /// Safe to run again: an existing index is updated incrementally.
    Init {
        /// Directory to index (defaults to `--root`).
        path: Option<PathBuf>,

        #[command(flatten)]
        index: IndexArgs,
    },

    /// Re-index files that changed since the last pass.
    Update {
        #[command(flatten)]
        index: IndexArgs,
    },

    /// Search the index with every applicable strategy and fuse the results.
    Find {
        query: String,

        /// Max results (defaults to `retrieval.default_limit`).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only return chunks in this language.
        #[arg(long)]
        language: Option<Language>,

        /// Machine-readable JSON output.
        #[arg(long)]
        json: bool,

        /// Include the full chunk text.
        #[arg(long)]
        full: bool,

        /// Skip vector search (never calls the embedding provider).
        #[arg(long)]
        no_vector: bool,

        /// JSON query plan (`[{"strategy": "fts", "query": "...", "weight": 1.0}]`).
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Look up declarations by name, type, parent, and language.
    Symbols {
        /// Name to match (all declarations when omitted).
        #[arg(long)]
        name: Option<String>,

        /// Declaration type: function, class, method, type, constant, import.
        #[arg(long = "type")]
        kind: Option<NodeKind>,

        /// Enclosing class or type.
        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        language: Option<Language>,

        /// How `--name` is compared.
        #[arg(long, value_enum, default_value_t = ModeArg::Fuzzy)]
        mode: ModeArg,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        full: bool,
    },

    /// Trace imports of a file or module.
    Deps {
        /// File path or module name.
        target: String,

        /// List importers of the target instead of what it imports.
        #[arg(long)]
        reverse: bool,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        language: Option<Language>,

        #[arg(long)]
        json: bool,
    },

    /// Show the chunk containing `<file>:<line>`.
    Chunk {
        location: String,

        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Watch the root and re-index changed files until interrupted.
    Watch {
        /// Skip the catch-up pass before watching.
        #[arg(long)]
        no_initial: bool,
    },

    /// Inspect or edit `.ctx/config.toml`.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Re-parse and re-embed every file, ignoring stored hashes.
    #[arg(long)]
    full: bool,

    /// Do not compute embeddings even when a provider is configured.
    #[arg(long)]
    no_embed: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Progress on stderr: off, human, or json (default: human on a TTY).
    #[arg(long, value_enum)]
    progress: Option<ProgressArg>,
}

impl IndexArgs {
    fn options(&self) -> IndexOptions {
        IndexOptions {
            full: self.full,
            skip_embedding: self.no_embed,
            json: self.json,
            progress: match self.progress {
                Some(ProgressArg::Off) => ProgressMode::Off,
                Some(ProgressArg::Human) => ProgressMode::Human,
                Some(ProgressArg::Json) => ProgressMode::Json,
                None => ProgressMode::default_for_tty(),
            },
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Set a dotted key, e.g. `ctx config set embedding.provider ollama`.
    Set { key: String, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Exact,
    Prefix,
    Fuzzy,
}

impl From<ModeArg> for MatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Exact => MatchMode::Exact,
            ModeArg::Prefix => MatchMode::Prefix,
            ModeArg::Fuzzy => MatchMode::Fuzzy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

fn resolve_root(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("root {} does not exist", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    kontext::logging::init(cli.verbose);

    match cli.command {
        Commands::Init { path, index } => {
            let root = resolve_root(path.as_deref().unwrap_or(&cli.root))?;
            index_cmd::run_init(&root, index.options()).await?;
        }
        Commands::Update { index } => {
            let root = resolve_root(&cli.root)?;
            index_cmd::run_update(&root, index.options()).await?;
        }
        Commands::Find {
            query,
            limit,
            language,
            json,
            full,
            no_vector,
            plan,
        } => {
            let root = resolve_root(&cli.root)?;
            let options = FindOptions {
                limit,
                language,
                json,
                full,
                no_vector,
                plan,
            };
            query::run_find(&root, &query, &options).await?;
        }
        Commands::Symbols {
            name,
            kind,
            parent,
            language,
            mode,
            limit,
            json,
            full,
        } => {
            let root = resolve_root(&cli.root)?;
            let options = SymbolOptions {
                name,
                kind,
                parent,
                language,
                mode: mode.into(),
                limit,
            };
            let results = query::symbols(&root, &options).await?;
            query::print_results(&results, json, full)?;
        }
        Commands::Deps {
            target,
            reverse,
            limit,
            language,
            json,
        } => {
            let root = resolve_root(&cli.root)?;
            let results = query::deps(&root, &target, reverse, limit, language).await?;
            query::print_results(&results, json, false)?;
        }
        Commands::Chunk { location, json } => {
            let root = resolve_root(&cli.root)?;
            query::run_chunk(&root, &location, json).await?;
        }
        Commands::Status { json } => {
            let root = resolve_root(&cli.root)?;
            status::run_status(&root, json).await?;
        }
        Commands::Watch { no_initial } => {
            let root = resolve_root(&cli.root)?;
            run_watch(&root, no_initial).await?;
        }
        Commands::Config { action } => {
            let root = resolve_root(&cli.root)?;
            match action {
                ConfigAction::Show => {
                    let cfg = config::load_config(&root)?;
                    print!("{}", config::show(&cfg)?);
                }
                ConfigAction::Set { key, value } => {
                    config::set_value(&root, &key, &value)?;
                    println!("{} = {}", key, value);
                }
            }
        }
    }

    Ok(())
}

async fn run_watch(root: &Path, no_initial: bool) -> Result<()> {
    let cfg = config::load_config(root)?;
    let embedder = index_cmd::embedder_for(&cfg, false)?;
    let store = index_cmd::open_store(root).await?;
    let debounce = Duration::from_millis(cfg.watch.debounce_ms);
    let indexer = Indexer::new(root, store.clone(), embedder, cfg);

    if !no_initial {
        let report = indexer.index_root(false).await?;
        eprintln!(
            "watch {}  indexed {}, removed {}, unchanged {}",
            root.display(),
            report.files_indexed,
            report.files_removed,
            report.files_unchanged
        );
    }

    let _watcher = IndexWatcher::start(indexer, debounce)?;
    eprintln!("watching {} (Ctrl-C to stop)", root.display());
    tokio::signal::ctrl_c().await?;
    store.close().await;
    Ok(())
}
