use clap::{Parser, Subcommand};
use mcpdiff::config::Config;
use mcpdiff::error::{self, HistoryError};
use mcpdiff::{commands, history, utils};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcpdiff", version, about = "Review and manage the edit history journal")]
struct Cli {
    /// Override workspace discovery; defaults to ascending from the current directory.
    #[arg(short = 'w', long = "workspace", global = true)]
    workspace: Option<PathBuf>,

    /// Enable debug logging for this invocation.
    #[arg(long, global = true)]
    verbose: bool,

    /// Lock acquisition timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Sweep stale locks before running the command.
    #[arg(long, global = true)]
    force_cleanup: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List edit entries, newest first, with optional filters.
    #[command(visible_alias = "st")]
    Status {
        #[arg(short = 'c', long)]
        conversation: Option<String>,
        #[arg(short = 'f', long)]
        file: Option<String>,
        #[arg(short = 's', long)]
        status: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(short = 'o', long)]
        operation: Option<String>,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Show a single edit (with its diff) or a whole conversation.
    #[command(visible_alias = "sh", visible_alias = "s")]
    Show { identifier: String },
    /// Accept a pending edit, or all pending edits in a conversation.
    #[command(visible_alias = "a")]
    Accept {
        #[arg(short = 'e', long, conflicts_with = "conversation")]
        edit: Option<String>,
        #[arg(short = 'c', long)]
        conversation: Option<String>,
    },
    /// Reject a pending or accepted edit, or all such edits in a conversation.
    #[command(visible_alias = "r")]
    Reject {
        #[arg(short = 'e', long, conflicts_with = "conversation")]
        edit: Option<String>,
        #[arg(short = 'c', long)]
        conversation: Option<String>,
    },
    /// Interactively walk pending edits oldest-first.
    #[command(visible_alias = "v")]
    Review {
        #[arg(short = 'c', long)]
        conversation: Option<String>,
    },
    /// Remove stale lock directories left behind by crashed processes.
    #[command(visible_alias = "clean")]
    Cleanup,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        utils::set_verbose(true);
    }

    let code = run(cli);
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let start = cli.workspace.clone().unwrap_or_else(|| PathBuf::from("."));
    let workspace = match history::paths::find_workspace_root(&start) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    let mut config = Config::load();
    if let Some(timeout) = cli.timeout {
        config.lock_timeout_secs = timeout;
    }

    if cli.force_cleanup
        && let Err(e) = commands::cleanup::run(&workspace)
    {
        eprintln!("error during forced cleanup: {e}");
    }

    let result = dispatch(&workspace, &config, cli.command);
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

fn dispatch(workspace: &std::path::Path, config: &Config, command: Commands) -> error::Result<()> {
    match command {
        Commands::Status {
            conversation,
            file,
            status,
            since,
            operation,
            limit,
        } => commands::status::run(
            workspace,
            config,
            commands::status::StatusArgs {
                conversation,
                file,
                status,
                since,
                operation,
                limit,
            },
        ),
        Commands::Show { identifier } => commands::show::run(workspace, config, &identifier),
        Commands::Accept { edit, conversation } => {
            let selector = selector_from_args(edit, conversation)?;
            commands::accept::run(workspace, config, commands::accept::Selector::from(selector))
        }
        Commands::Reject { edit, conversation } => {
            let selector = selector_from_args(edit, conversation)?;
            commands::reject::run(workspace, config, commands::reject::Selector::from(selector))
        }
        Commands::Review { conversation } => {
            commands::review::run(workspace, config, conversation.as_deref())
        }
        Commands::Cleanup => commands::cleanup::run(workspace),
    }
}

enum RawSelector {
    Edit(String),
    Conversation(String),
}

impl From<RawSelector> for commands::accept::Selector {
    fn from(r: RawSelector) -> Self {
        match r {
            RawSelector::Edit(e) => commands::accept::Selector::Edit(e),
            RawSelector::Conversation(c) => commands::accept::Selector::Conversation(c),
        }
    }
}

impl From<RawSelector> for commands::reject::Selector {
    fn from(r: RawSelector) -> Self {
        match r {
            RawSelector::Edit(e) => commands::reject::Selector::Edit(e),
            RawSelector::Conversation(c) => commands::reject::Selector::Conversation(c),
        }
    }
}

fn selector_from_args(edit: Option<String>, conversation: Option<String>) -> error::Result<RawSelector> {
    match (edit, conversation) {
        (Some(e), None) => Ok(RawSelector::Edit(e)),
        (None, Some(c)) => Ok(RawSelector::Conversation(c)),
        (Some(_), Some(_)) => Err(HistoryError::InvalidState(
            "pass either -e/--edit or -c/--conversation, not both".to_string(),
        )),
        (None, None) => Err(HistoryError::InvalidState(
            "one of -e/--edit or -c/--conversation is required".to_string(),
        )),
    }
}
