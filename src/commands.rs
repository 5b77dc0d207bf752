//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use homie::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { question, .. } => println!("asking {question}"),
//!     _ => {}
//! }
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Model id to use instead of the configured selection.
    #[arg(long, short = 'm', global = true, env = "HOMIE_MODEL")]
    pub model: Option<String>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Where the page content comes from.
#[derive(Args, Debug, Clone)]
pub struct PageArgs {
    /// File holding the extracted page text, or `-` for stdin.
    #[arg(long, short = 'p', default_value = "-")]
    pub page: PathBuf,

    /// Page title; defaults to the file name.
    #[arg(long)]
    pub title: Option<String>,

    /// Page URL. Conversations are only saved to history when one is given.
    #[arg(long, short = 'u')]
    pub url: Option<String>,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a sample config and the built-in assistant preset.
    Init,

    /// Summarize the page.
    #[clap(name = "summarize", alias = "s")]
    Summarize {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Run an assistant preset on the page.
    #[clap(name = "assistant", alias = "run")]
    Assistant {
        /// Preset id or name.
        name: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Ask a question about the page, continuing its stored conversation.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Start over instead of continuing the stored conversation.
        #[arg(long)]
        fresh: bool,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List assistant presets.
    Assistants {
        /// Include disabled presets.
        #[arg(long)]
        all: bool,
    },

    /// List configured models.
    Models {
        /// Ask the selected model's endpoint which models it serves.
        #[arg(long)]
        remote: bool,
    },

    /// Browse and manage stored conversations.
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List stored conversations, most recent first.
    List {
        /// Case-insensitive match on title or URL.
        #[arg(long, short = 's')]
        search: Option<String>,

        /// Only conversations held with this model name.
        #[arg(long = "model-name")]
        model_name: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// Print the stored conversation for a URL.
    Show { url: String },

    /// Delete one stored conversation by id.
    Delete { id: String },

    /// Delete every stored conversation.
    Clear,
}
