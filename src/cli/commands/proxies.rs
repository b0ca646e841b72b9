//! Proxy pool inspection command.

use std::path::PathBuf;

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::proxy::parse_proxy_list;

/// Parse the proxy file and print the normalized pool with credentials redacted.
pub async fn cmd_proxies(settings: &Settings, file: Option<PathBuf>) -> anyhow::Result<()> {
    let Some(path) = file.or_else(|| settings.proxy_file.clone()) else {
        println!(
            "{} No proxy file configured, requests go out directly",
            style("!").yellow()
        );
        return Ok(());
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading proxy file {}", path.display()))?;
    let (proxies, invalid) = parse_proxy_list(&text);

    println!("\n{}", style(format!("Proxy Pool: {}", path.display())).bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Rotation:", settings.rotation);
    println!("{:<20} {}", "Proxies:", proxies.len());
    if !invalid.is_empty() {
        println!("{:<20} {}", "Invalid lines:", style(invalid.len()).yellow());
    }
    println!();

    for (i, proxy) in proxies.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, proxy.redacted());
    }
    for (line, error) in &invalid {
        println!("  {} line {}: {}", style("✗").red(), line, error);
    }
    Ok(())
}
