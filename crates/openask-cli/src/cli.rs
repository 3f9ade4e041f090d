use clap::{Args, Parser, Subcommand};
use openask_engine::Protocol;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "openask")]
#[command(version, about = "OpenAsk - streaming chat client for Ask AI backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Config file path (defaults to ~/.config/openask/config.toml)
    #[arg(long, global = true, env = "OPENASK_CONFIG")]
    pub config: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Server connection overrides. Unset fields fall back to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Backend base URL (session protocol) or chat endpoint (chunk-stream protocol)
    #[arg(long, global = true, env = "OPENASK_API_URL")]
    pub api_url: Option<String>,

    /// Project id for project-scoped backends
    #[arg(long, global = true, env = "OPENASK_PROJECT")]
    pub project: Option<String>,

    /// Wire protocol: session or chunk-stream
    #[arg(long, global = true, env = "OPENASK_PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// Show model reasoning parts
    #[arg(long, global = true)]
    pub reasoning: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a single question and stream the answer
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Interactive chat (`/reset` clears the conversation, `/quit` exits)
    Chat,

    /// Server session management
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Create a session and print its id
    Create,

    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
}
