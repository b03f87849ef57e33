//! Command-line interface definition, parsed with `clap`.
//!
//! The CLI is the thin driver over the orchestration service: one
//! subcommand per public operation, plus `init` for first-run setup. HTTP
//! routing, when wanted, is expected to wrap the same orchestrator calls.

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Create the config directory with a default config file and prompt
    /// template.
    Init,

    /// Single-turn chat without story context.
    #[clap(name = "chat", alias = "c")]
    Chat {
        /// The message to send.
        message: String,

        #[arg(short, long, default_value = "ollama")]
        provider: String,

        /// Conversation to append to; a fresh id is generated when absent.
        #[arg(short, long)]
        conversation: Option<String>,

        /// Overrides the provider's stored default model.
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Create or update a conversation's story settings.
    #[clap(name = "setup")]
    Setup {
        conversation: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        background: Option<String>,

        #[arg(long)]
        outline: Option<String>,

        /// Character entry as `Name` or `Name=personality`; repeatable.
        #[arg(long = "character")]
        characters: Vec<String>,
    },

    /// Confirm the story outline, unlocking section generation.
    #[clap(name = "confirm-outline")]
    ConfirmOutline {
        conversation: String,
    },

    /// Generate the current story section.
    #[clap(name = "generate", alias = "g")]
    Generate {
        conversation: String,

        #[arg(short, long, default_value = "ollama")]
        provider: String,

        #[arg(short, long)]
        model: Option<String>,

        /// Stream the section to the terminal as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Confirm the current section and generate the next one.
    #[clap(name = "confirm")]
    Confirm {
        conversation: String,

        #[arg(short, long, default_value = "ollama")]
        provider: String,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Rewrite or adjust the last generated section from feedback.
    #[clap(name = "rewrite", alias = "r")]
    Rewrite {
        conversation: String,

        /// What to change about the last section.
        feedback: String,

        #[arg(short, long, default_value = "ollama")]
        provider: String,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Summarize the conversation's full history.
    #[clap(name = "summarize", alias = "s")]
    Summarize {
        conversation: String,

        #[arg(short, long, default_value = "ollama")]
        provider: String,

        #[arg(short, long)]
        model: Option<String>,
    },
}
