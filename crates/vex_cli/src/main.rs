//! vex - a version control system where every operation is undoable.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "vex")]
#[command(about = "A version control system where every operation is undoable", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit one canonical JSON document on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Run through the transaction layer but abort instead of committing
    #[arg(long, global = true)]
    fake: bool,

    /// On a domain error, keep the half-applied state for inspection
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository in the current directory
    Init {
        /// Subtree prefix to check out (defaults to /<directory name>)
        #[arg(long)]
        prefix: Option<String>,
        /// Include pattern, repeatable
        #[arg(long)]
        include: Vec<String>,
        /// Ignore pattern, repeatable
        #[arg(long)]
        ignore: Vec<String>,
    },
    /// Track files, recording their current contents
    Add {
        /// Files or directories
        files: Vec<PathBuf>,
    },
    /// Untrack paths without touching the working copy
    Forget {
        /// Tracked paths
        files: Vec<PathBuf>,
    },
    /// Untrack paths and delete them from the working copy
    Remove {
        /// Tracked paths
        files: Vec<PathBuf>,
    },
    /// Overwrite working-copy paths from the current commit
    Restore {
        /// Tracked paths
        files: Vec<PathBuf>,
    },
    /// Add ignore patterns
    Ignore {
        /// Patterns
        patterns: Vec<String>,
    },
    /// Add include patterns
    Include {
        /// Patterns
        patterns: Vec<String>,
    },
    /// Show the working copy's tracked state
    Status,
    /// Show commit history
    Log {
        /// Walk past the branch base
        #[arg(long)]
        all: bool,
        /// Maximum commits to show
        #[arg(long, default_value = "50")]
        count: usize,
    },
    /// Commit prepared and working changes
    Commit {
        /// Commit message
        #[arg(long)]
        message: Option<String>,
    },
    /// Capture working changes without moving the branch head
    #[command(name = "commit:prepare")]
    CommitPrepare {
        /// Re-prepare on every filesystem change
        #[arg(long)]
        watch: bool,
        /// Poll interval in seconds while watching
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Replace the branch head with a corrected commit
    #[command(name = "commit:amend")]
    CommitAmend {
        /// Replacement message
        #[arg(long)]
        message: Option<String>,
    },
    /// Change the checkout prefix
    Switch {
        /// Repository path of the subtree to materialize
        prefix: String,
    },
    /// Create a branch at the current head and open it
    #[command(name = "branch:new")]
    BranchNew {
        /// Branch name
        name: String,
    },
    /// Switch branches, stashing uncommitted work
    #[command(name = "branch:open")]
    BranchOpen {
        /// Branch name
        name: String,
    },
    /// Fork the current state into a new branch, keeping the working copy
    #[command(name = "branch:saveas")]
    BranchSaveas {
        /// Branch name
        name: String,
    },
    /// Exchange names with another branch
    #[command(name = "branch:swap")]
    BranchSwap {
        /// The other branch
        name: String,
    },
    /// Rename the active branch
    #[command(name = "branch:rename")]
    BranchRename {
        /// New name
        name: String,
    },
    /// List branches
    #[command(name = "branch:list")]
    BranchList,
    /// List the active branch's sessions
    #[command(name = "session:list")]
    SessionList,
    /// Undo the most recent action
    Undo,
    /// List undoable actions
    #[command(name = "undo:list")]
    UndoList {
        /// Maximum entries
        #[arg(long, default_value = "50")]
        count: usize,
    },
    /// Redo an undone action
    Redo {
        /// 1-based alternative to re-apply
        #[arg(long)]
        choice: Option<usize>,
    },
    /// List redo alternatives
    #[command(name = "redo:list")]
    RedoList,
    /// Read a file property
    #[command(name = "prop:get")]
    PropGet {
        /// Tracked file
        file: PathBuf,
    },
    /// Set a file property
    #[command(name = "prop:set")]
    PropSet {
        /// Tracked file
        file: PathBuf,
        /// Property name
        name: String,
        /// Property value
        value: String,
    },
    /// Show the pending commit message
    #[command(name = "message:get")]
    MessageGet,
    /// Set the pending commit message
    #[command(name = "message:set")]
    MessageSet {
        /// The message
        message: String,
    },
    /// Rewrite history with the given paths removed
    Purge {
        /// Paths to remove from every commit
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print an object by id or unambiguous prefix
    #[command(name = "debug:cat")]
    DebugCat {
        /// Object id or hex prefix
        id: String,
    },
    /// Dump scratch pointers and transaction state
    #[command(name = "debug:status")]
    DebugStatus,
    /// Finish or roll back an interrupted transaction
    #[command(name = "debug:rollback")]
    DebugRollback,
    /// Delete unreachable objects
    #[command(name = "debug:gc")]
    DebugGc {
        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the grace period
        #[arg(long)]
        aggressive: bool,
    },
}

fn main() -> ExitCode {
    // Respects RUST_LOG (e.g. RUST_LOG=debug); logs go to stderr so
    // --json output stays a single clean document on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var_os("NO_COLOR").is_some() {
        console::set_colors_enabled(false);
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let code = err
                .downcast_ref::<vex_core::VexError>()
                .map(|e| {
                    if let Some(hint) = e.recovery_suggestion() {
                        eprintln!("hint: {}", hint);
                    }
                    e.exit_code()
                })
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let out = commands::Output::new(cli.json);

    // `init` is the one command that runs before a repository exists.
    match cli.command {
        Commands::Init {
            prefix,
            include,
            ignore,
        } => commands::init::run(&out, prefix.as_deref(), include, ignore),
        command => {
            let project = commands::open_project(cli.fake, cli.debug)?;
            dispatch(&project, &out, command)
        }
    }
}

fn dispatch(project: &vex_core::Project, out: &commands::Output, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => unreachable!("handled before the repository opens"),
        Commands::Add { files } => commands::files::add(project, out, &files),
        Commands::Forget { files } => commands::files::forget(project, out, &files),
        Commands::Remove { files } => commands::files::remove(project, out, &files),
        Commands::Restore { files } => commands::files::restore(project, out, &files),
        Commands::Ignore { patterns } => commands::files::ignore(project, out, patterns),
        Commands::Include { patterns } => commands::files::include(project, out, patterns),
        Commands::Status => commands::status::status(project, out),
        Commands::Log { all, count } => commands::status::log(project, out, all, count),
        Commands::Commit { message } => commands::commit::commit(project, out, message),
        Commands::CommitPrepare { watch, interval } => {
            commands::commit::prepare(project, out, watch, interval)
        }
        Commands::CommitAmend { message } => commands::commit::amend(project, out, message),
        Commands::Switch { prefix } => commands::branch::switch(project, out, &prefix),
        Commands::BranchNew { name } => commands::branch::new(project, out, &name),
        Commands::BranchOpen { name } => commands::branch::open(project, out, &name),
        Commands::BranchSaveas { name } => commands::branch::saveas(project, out, &name),
        Commands::BranchSwap { name } => commands::branch::swap(project, out, &name),
        Commands::BranchRename { name } => commands::branch::rename(project, out, &name),
        Commands::BranchList => commands::branch::list(project, out),
        Commands::SessionList => commands::branch::sessions(project, out),
        Commands::Undo => commands::undo::undo(project, out),
        Commands::UndoList { count } => commands::undo::undo_list(project, out, count),
        Commands::Redo { choice } => commands::undo::redo(project, out, choice),
        Commands::RedoList => commands::undo::redo_list(project, out),
        Commands::PropGet { file } => commands::props::get(project, out, &file),
        Commands::PropSet { file, name, value } => {
            commands::props::set(project, out, &file, &name, &value)
        }
        Commands::MessageGet => commands::props::message_get(project, out),
        Commands::MessageSet { message } => commands::props::message_set(project, out, &message),
        Commands::Purge { paths } => commands::purge::run(project, out, &paths),
        Commands::DebugCat { id } => commands::debug::cat(project, out, &id),
        Commands::DebugStatus => commands::debug::status(project, out),
        Commands::DebugRollback => commands::debug::rollback(project, out),
        Commands::DebugGc {
            dry_run,
            aggressive,
        } => commands::debug::gc(project, out, dry_run, aggressive),
    }
}
