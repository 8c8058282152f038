use camino::Utf8PathBuf;
use clap::{crate_description, ArgAction, Args, ColorChoice, Parser, Subcommand};
use clap_complete::Shell;

use crate::cfg::Direction;

#[derive(Parser, Debug)]
#[command(
    version,
    about=crate_description!(),
    infer_subcommands(true),
    color(ColorChoice::Auto)
)]
#[command(propagate_version = true)]
pub struct Opts {
    /// Make output more verbose.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Opts {
    pub fn loglevel(&self) -> log::Level {
        if self.verbose > 2 {
            log::Level::Trace
        } else if self.verbose > 1 {
            log::Level::Debug
        } else if self.verbose > 0 {
            log::Level::Info
        } else {
            log::Level::Warn
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show config
    #[command(name = "config")]
    Config(Config),

    /// Generate completions
    #[command(name = "generate")]
    Generate(Generate),

    /// Inspect or prune the persistent link store
    #[command(name = "links")]
    Links(Links),

    /// Run a parse action (mainly for debugging)
    #[command(name = "parse")]
    Parse(Parse),

    /// Check which tasks are defined in the reminder store (mainly for debugging)
    #[command(name = "reminders")]
    Reminders(Reminders),

    /// Sync task lines between Markdown vaults and the reminder store.
    Sync(Sync),
}

#[derive(Args, Debug)]
pub struct Config {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    #[command(name = "show")]
    Show,
}

#[derive(Args, Debug)]
pub struct Links {
    #[command(subcommand)]
    pub command: LinksCommand,
}

#[derive(Subcommand, Debug)]
pub enum LinksCommand {
    /// Print all persisted links.
    #[command(name = "show")]
    Show,

    /// Drop links whose endpoints no longer exist.
    #[command(name = "prune")]
    Prune(PruneLinks),
}

#[derive(Args, Debug)]
pub struct PruneLinks {
    /// Vaults whose tasks anchor the document side.
    #[arg(required = true)]
    pub vaults: Vec<Utf8PathBuf>,

    /// Actually remove broken links instead of reporting them.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Args, Debug)]
pub struct Reminders {
    /// output as json
    #[arg(short, long)]
    pub json: bool,

    /// Restrict to these list ids (default: all lists).
    #[arg(short, long)]
    pub list: Vec<String>,

    /// Include completed reminders.
    #[arg(long)]
    pub include_completed: bool,
}

/// Generation-related commands
#[derive(Args, Debug)]
pub struct Generate {
    /// What to generate
    #[command(subcommand)]
    pub target: GenerateTarget,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GenerateTarget {
    /// Generate markdown from help messages
    #[command(name = "help-markdown")]
    HelpMarkdown,

    /// Completion script
    Completion(CompletionOpts),
}

/// Parse-related commands
#[derive(Args, Debug)]
pub struct Parse {
    /// Markdown file to parse
    #[arg(required = true)]
    pub target: Utf8PathBuf,
}

/// Sync tasks (bread and butter)
#[derive(Args, Debug)]
pub struct Sync {
    /// Vaults to sync.
    #[arg(required = true)]
    pub vaults: Vec<Utf8PathBuf>,

    /// Write changes; without this flag the run is a dry run.
    #[arg(long)]
    pub apply: bool,

    /// Override the configured sync direction.
    #[arg(short, long, value_enum)]
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Args)]
pub struct CompletionOpts {
    /// Shell to generate completions for
    pub shell: Shell,
}
