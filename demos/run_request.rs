use std::io::Read;

use anyhow::{Context, bail};
use netcli::config::EngineConfig;
use netcli::dispatcher::RequestDispatcher;
use netcli::protocol::CliRequest;
use netcli::templates;

fn validate_templates() -> anyhow::Result<()> {
    for name in templates::available_templates() {
        let diagnostics = templates::diagnose_template(name)?;
        if diagnostics.has_issues() {
            bail!(
                "template '{name}' has diagnostics issues: modes_without_prompts={:?}, missing_sources={:?}, missing_targets={:?}",
                diagnostics.modes_without_prompts,
                diagnostics.missing_edge_sources,
                diagnostics.missing_edge_targets
            );
        }
    }
    Ok(())
}

fn read_request(path: Option<&str>) -> anyhow::Result<CliRequest> {
    let text = match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("read request file {path}"))?
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("read request from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("decode request json")
}

/// Usage: run_request [--catalog] [--config engine.json] [request.json]
///
/// Reads one request as JSON (from the file or stdin), runs it against the
/// device and prints the response as JSON.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--catalog") {
        println!("{}", serde_json::to_string_pretty(&templates::template_catalog())?);
        return Ok(());
    }

    let mut config = EngineConfig::default();
    let mut request_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config needs a path")?;
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {path}"))?;
            config = EngineConfig::from_json(&text).context("decode config json")?;
        } else {
            request_path = Some(arg.as_str());
        }
    }

    validate_templates()?;
    let request = read_request(request_path)?;
    let dispatcher = RequestDispatcher::with_builtin_profiles(config)?;
    let response = dispatcher.handle(request).await;
    dispatcher.sessions().shutdown().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}
