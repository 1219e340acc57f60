//! MCP subcommand handlers for exthost.

use exthost_config::Config;
use exthost_core::ExtensionHost;

use crate::cli::McpAction;

/// Handle MCP subcommands.
pub(crate) async fn handle_mcp_command(
    action: McpAction,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        McpAction::List { format } => mcp_list(config, &format).await,
    }
}

/// Connect every installed extension and print its servers.
async fn mcp_list(config: &Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut host = ExtensionHost::open(config).await?;
    host.restore().await;
    let snapshot = host.snapshot();
    host.shutdown().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&snapshot.connections)?);
        return Ok(());
    }

    if snapshot.connections.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    println!("{:<24} {:<16} {:<10} {}", "EXTENSION", "SERVER", "STATE", "ENDPOINT");
    println!("{}", "-".repeat(80));
    for conn in &snapshot.connections {
        println!(
            "{:<24} {:<16} {:<10} {}",
            conn.extension, conn.server, conn.state, conn.endpoint
        );
        if !conn.tools.is_empty() {
            println!("    tools: {}", conn.tools.join(", "));
        }
    }

    for readiness in &snapshot.readiness {
        println!("{}: {}", readiness.extension, readiness.message());
    }
    Ok(())
}
