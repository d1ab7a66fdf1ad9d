// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use sven_config::AgentMode;

/// `sven cron` subcommands — thin CLI surface over the cron scheduler
/// (spec.md §4.7 `createJob`/`removeJob`/`runJob`/`setReminder`).
#[derive(Subcommand, Debug)]
pub enum CronCommands {
    /// List all cron jobs.
    List,
    /// Remove a cron job by id.
    Remove {
        /// Job id to remove.
        id: String,
    },
    /// Fire a cron job immediately, out of schedule.
    Run {
        /// Job id to run.
        id: String,
    },
    /// Schedule a one-shot reminder that fires a `systemEvent` after a delay.
    Remind {
        /// Reminder text.
        text: String,
        /// Delay, e.g. "2s", "5m", "1h" (humantime syntax).
        #[arg(long, default_value = "5m")]
        after: String,
    },
    /// List pending (and, with --all, fired) reminders.
    Reminders {
        /// Include already-fired reminders.
        #[arg(long)]
        all: bool,
    },
}

/// Output format for a single headless turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Plain text: only the final agent reply.
    #[default]
    Text,
    /// Structured JSON: the final reply plus basic turn metadata.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "sven",
    about = "Multi-channel conversational agent runtime",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Prompt to run a single turn with, then exit. Omit and pipe stdin instead.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Agent mode
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5"
    #[arg(long, short = 'M', env = "SVEN_MODEL")]
    pub model: Option<String>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format for the single-turn run (text | json)
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Override the system prompt by reading from a file.
    #[arg(long, value_name = "PATH")]
    pub system_prompt_file: Option<PathBuf>,

    /// Append text to the default system prompt (after the Guidelines section).
    #[arg(long, value_name = "TEXT")]
    pub append_system_prompt: Option<String>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the multi-channel agent runtime: ingest messages from transport
    /// adapters (console, and any chat adapters compiled in), dedupe them,
    /// and drive each session's turn loop through the scheduler.
    ///
    /// Run `sven serve` with no other arguments to start the console
    /// adapter only; this is the interactive entry point the spec calls
    /// "the interactive console" transport.
    Serve {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Cron/reminder management: list, create, run, or remove scheduled jobs.
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },

    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List available models for the configured provider(s).
    ///
    /// By default the static built-in catalog is shown.
    /// With --refresh the configured provider API is queried for live data.
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },

    /// List all supported model providers.
    ///
    /// Shows each provider's id, name, description, and default API key
    /// environment variable.  Use the provider id in your config file under
    /// `model.provider`.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sven", &mut std::io::stdout());
}
