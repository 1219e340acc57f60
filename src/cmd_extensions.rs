//! Extension subcommand handlers for exthost.

use tracing::warn;

use exthost_config::Config;
use exthost_core::{ExtensionHost, ReloadOutcome};
use exthost_protocols::ExtensionRecord;

use crate::cli::ExtensionsAction;

/// Handle extension subcommands.
pub(crate) async fn handle_extensions_command(
    action: ExtensionsAction,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut host = ExtensionHost::open(config).await?;

    let result = match action {
        ExtensionsAction::Install { source } => extension_install(&host, &source).await,
        ExtensionsAction::Uninstall { name } => extension_uninstall(&host, &name).await,
        ExtensionsAction::Update { name, all } => {
            extension_update(&host, name.as_deref(), all).await
        }
        ExtensionsAction::List { format } => extension_list(&host, &format),
        ExtensionsAction::Check => extension_check(&host).await,
    };

    host.shutdown().await;
    result
}

async fn extension_install(
    host: &ExtensionHost,
    source: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = host.install(source).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn extension_uninstall(
    host: &ExtensionHost,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = host.uninstall(name).await?;
    println!("Uninstalled {} {}", record.name, record.installed_version);
    Ok(())
}

/// Update one extension, or every extension with `all`.
///
/// Existing records are restored first so the update replaces a live
/// generation the same way a running host would.
async fn extension_update(
    host: &ExtensionHost,
    name: Option<&str>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    host.restore().await;

    if all {
        let mut failed = 0;
        for (name, result) in host.update_all().await {
            match result {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => {
                    failed += 1;
                    println!("{}: update failed: {}", name, e);
                }
            }
        }
        if failed > 0 {
            return Err(format!("{} extension update(s) failed", failed).into());
        }
        return Ok(());
    }

    let Some(name) = name else {
        return Err("an extension name or --all is required".into());
    };
    let outcome = host.update(name).await?;
    print_outcome(&outcome);
    Ok(())
}

fn extension_list(host: &ExtensionHost, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let records = host.list();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No extensions installed.");
        return Ok(());
    }

    println!("{:<24} {:<12} {:<6} {}", "NAME", "VERSION", "GEN", "SOURCE");
    println!("{}", "-".repeat(80));
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &ExtensionRecord) {
    println!(
        "{:<24} {:<12} {:<6} {}",
        record.name, record.installed_version, record.generation, record.source
    );
    for warning in &record.warnings {
        println!("    warning: {}", warning);
    }
}

async fn extension_check(host: &ExtensionHost) -> Result<(), Box<dyn std::error::Error>> {
    let checks = host.check().await;
    if checks.is_empty() {
        println!("No extensions installed.");
        return Ok(());
    }

    for (name, result) in checks {
        match result {
            Ok(check) if check.available => println!(
                "{}: update available {} → {}",
                name,
                check.installed,
                check.candidate_version()
            ),
            Ok(check) => println!("{}: up to date ({})", name, check.installed),
            Err(e) => {
                warn!("Update check failed for {}: {}", name, e);
                println!("{}: check failed: {}", name, e);
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &ReloadOutcome) {
    println!("{}", outcome);
    if let ReloadOutcome::Committed {
        warnings, report, ..
    } = outcome
    {
        for server in &report.servers {
            println!("    {}: {:?}", server.server, server.status);
        }
        for warning in warnings {
            println!("    warning: {}", warning);
        }
    }
}
