use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ask a local OpenAI-compatible model about some text
#[derive(Debug, Parser)]
#[command(name = "ask-llama")]
#[command(version)]
#[command(about = "Send selected text plus a prompt to a local LLM and stream the answer", long_about = None)]
pub struct Args {
    /// Model name sent in the request (default: config/model or "llama.cpp")
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<String>,

    /// Chat-completions endpoint URL
    #[arg(long = "url", global = true)]
    pub url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long = "api-key", global = true)]
    pub api_key: Option<String>,

    /// File whose contents are sent as the selected text
    #[arg(short = 'c', long = "context-file", value_name = "PATH", global = true)]
    pub context_file: Option<PathBuf>,

    /// Read the selected text from standard input
    #[arg(long = "stdin", conflicts_with = "context_file", global = true)]
    pub stdin: bool,

    /// Wait for the whole answer instead of streaming it
    #[arg(long = "no-stream", global = true)]
    pub no_stream: bool,

    /// Print the request that would be sent instead of sending it
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show or change the saved configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },

    /// Open the interactive ask dialog in the terminal
    #[cfg(feature = "tui")]
    Tui,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings (API key masked)
    Show,
    /// Print the config file location
    Path,
    /// Set a key; an empty value resets it to the default
    Set {
        /// url, api_key, model, shortcut, temperature, max_tokens, timeout_secs or stream
        key: String,
        value: String,
    },
    /// Delete the config file
    Reset,
}
