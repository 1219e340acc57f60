//! CLI definitions for exthost.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// exthost CLI.
#[derive(Parser)]
#[command(name = "exthost")]
#[command(about = "Extension lifecycle manager with hot reload of MCP servers and hooks")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "EXTHOST_CONFIG",
        default_value = "~/.exthost/config.toml",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Activate installed extensions and watch for updates (default)
    Run,

    /// Extension management commands
    Extensions {
        #[command(subcommand)]
        action: ExtensionsAction,
    },

    /// MCP server commands
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ExtensionsAction {
    /// Install an extension from a directory or manifest URL
    Install {
        /// Local path or http(s) URL
        source: String,
    },

    /// Uninstall an extension
    Uninstall {
        /// Extension name
        name: String,
    },

    /// Update one extension, or every extension with --all
    Update {
        /// Extension name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Update every installed extension
        #[arg(long)]
        all: bool,
    },

    /// List installed extensions
    List {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Check installed extensions for updates without applying them
    Check,
}

#[derive(Subcommand)]
pub(crate) enum McpAction {
    /// Connect every installed extension's servers and list their tools
    List {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}
