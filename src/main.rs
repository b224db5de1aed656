//! # gart CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gart init [path]` | Create a repository |
//! | `gart add --text T \| --file P...` | Ingest text or files |
//! | `gart find [--all] [--any] [--none] [--type] [--ext]` | Query by tags |
//! | `gart tag <oid> [--add] [--remove]` | Retag an object |
//! | `gart list [--systemic]` | List known tags |
//! | `gart info [oid]` | Show a card, or repository statistics |
//! | `gart update <oid> --lock \| --unlock \| --drop-path P` | Edit a card |
//! | `gart delete <oid>... \| --tags a,b` | Soft-delete objects |
//! | `gart verify` | Cross-check the index |
//! | `gart rebuild` | Recompute tagmaps from cards |
//!
//! ## Exit codes
//!
//! `0` success, `1` error, `2` usage, `3` interrupted, `4` I/O fault or bug.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};
use gart::add::{run_add, AddSource};
use gart::find::{run_find, FindArgs};
use gart::index::UpdateOp;
use gart::repo::Repo;
use gart::session::Session;
use gart::{info, interrupt, tag, update, verify, Error};
use gart_core::ObjectType;
use tracing_subscriber::EnvFilter;

/// A content-addressed archive indexer with tag queries.
#[derive(Parser)]
#[command(name = "gart", version, about)]
struct Cli {
    /// Repository root. Defaults to $GART_REPO, then the nearest ancestor
    /// directory containing `.gart/`.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new repository.
    Init {
        /// Directory to initialize (default: current directory).
        path: Option<PathBuf>,
    },

    /// Ingest inline text or files.
    #[command(group(ArgGroup::new("source").required(true).args(["text", "file"])))]
    Add {
        /// Text to archive.
        #[arg(long)]
        text: Option<String>,

        /// Files (or, with --recursive, directories) to archive.
        #[arg(long, num_args = 1..)]
        file: Vec<PathBuf>,

        /// Descend into directories.
        #[arg(long, short)]
        recursive: bool,

        /// Comma-separated tags to attach.
        #[arg(long, short, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Find objects by tag.
    Find {
        /// Objects must carry every one of these tags.
        #[arg(long, value_delimiter = ',')]
        all: Vec<String>,

        /// Objects must carry at least one of these tags.
        #[arg(long, value_delimiter = ',')]
        any: Vec<String>,

        /// Objects must carry none of these tags.
        #[arg(long, value_delimiter = ',')]
        none: Vec<String>,

        /// Restrict to one object type (text, file, url, uri).
        #[arg(long = "type")]
        kind: Option<ObjectType>,

        /// Restrict to files with this extension.
        #[arg(long)]
        ext: Option<String>,

        /// Include soft-deleted objects.
        #[arg(long)]
        deleted: bool,
    },

    /// Add or remove tags on an object.
    Tag {
        /// Object id or unique prefix.
        oid: String,

        #[arg(long, value_delimiter = ',')]
        add: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        remove: Vec<String>,
    },

    /// List tags in the dictionary.
    List {
        /// Include systemic tags.
        #[arg(long)]
        systemic: bool,
    },

    /// Show an object's card, or repository statistics without an id.
    Info {
        /// Object id or unique prefix.
        oid: Option<String>,
    },

    /// Lock, unlock, or drop a path from an object.
    #[command(group(ArgGroup::new("op").required(true).args(["lock", "unlock", "drop_path"])))]
    Update {
        /// Object id or unique prefix.
        oid: String,

        #[arg(long)]
        lock: bool,

        #[arg(long)]
        unlock: bool,

        #[arg(long)]
        drop_path: Option<PathBuf>,
    },

    /// Soft-delete objects by id, or every object carrying all given tags.
    Delete {
        /// Object ids or unique prefixes.
        oids: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Cross-check the object index, cards, tagmaps, and tag dictionary.
    Verify,

    /// Recompute every tagmap from the cards.
    Rebuild,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env("GART_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init { path } = &cli.command {
        init_tracing("warn");
        let root = match path {
            Some(p) => p.clone(),
            None => std::env::current_dir()?,
        };
        let repo = Repo::init(&root)?;
        println!(
            "Initialized empty gart repository in {}",
            repo.gart_dir().display()
        );
        return Ok(());
    }

    let session = Session::open(cli.repo.as_deref(), cli.json)?;
    init_tracing(&session.config.log.level);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Add {
            text,
            file,
            recursive,
            tags,
        } => {
            let source = match text {
                Some(text) => AddSource::Text(text),
                None => AddSource::Files {
                    paths: file,
                    recursive,
                },
            };
            run_add(&session, source, &tags)
        }
        Commands::Find {
            all,
            any,
            none,
            kind,
            ext,
            deleted,
        } => run_find(
            &session,
            &FindArgs {
                all,
                any,
                none,
                kind,
                ext,
                include_deleted: deleted,
            },
        ),
        Commands::Tag { oid, add, remove } => tag::run_tag(&session, &oid, &add, &remove),
        Commands::List { systemic } => tag::run_list(&session, systemic),
        Commands::Info { oid } => info::run_info(&session, oid.as_deref()),
        Commands::Update {
            oid,
            lock,
            unlock: _,
            drop_path,
        } => {
            let op = match (lock, drop_path) {
                (true, _) => UpdateOp::Lock,
                (false, Some(p)) => UpdateOp::RemovePath(p),
                (false, None) => UpdateOp::Unlock,
            };
            update::run_update(&session, &oid, op)
        }
        Commands::Delete { oids, tags } => update::run_delete(&session, &oids, &tags),
        Commands::Verify => verify::run_verify(&session),
        Commands::Rebuild => verify::run_rebuild(&session),
    }
}

/// Print the one-line diagnostic and pick the exit code.
fn report(err: &anyhow::Error) -> ExitCode {
    let (category, code) = match err.downcast_ref::<Error>() {
        Some(e) => (e.category(), e.exit_code()),
        None => ("err", 1),
    };
    eprintln!("gart: {}: {:#}", category, err);
    ExitCode::from(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt::raise();
        }
    });

    match tokio::task::spawn_blocking(move || run(cli)).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => report(&err),
        Err(join) => {
            eprintln!("gart: bug: command panicked: {}", join);
            ExitCode::from(4)
        }
    }
}
