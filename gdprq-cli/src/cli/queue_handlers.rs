//! Queue command handlers

use crate::cli::session::{config_path, parse_queue_name, Session};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{TimeZone, Utc};
use gdprq_core::gdpr::actions::DOWNLOAD_AS_FILE;
use gdprq_core::gdpr::QueueName;
use gdprq_core::models::Configuration;
use gdprq_core::queue::{load_queue, remove_queue, Action, QueueController, QueueRunner, RunOutcome};
use std::path::PathBuf;
use url::Url;

/// Handle start command
pub async fn handle_start(
    config: Option<PathBuf>,
    queue: String,
    service: Option<String>,
    json: bool,
) -> Result<()> {
    let name = parse_queue_name(&queue)?;
    let session = Session::load(config)?;

    // A fresh run begins on the queue's own start page
    let start_page = gdprq_core::gdpr::start_page_url(&session.config.pages, name)?;
    let context = session.context(name, Some(start_page), service)?;

    let outcome = session
        .drive(name, context, true)
        .await
        .with_context(|| format!("Failed to run queue '{}'", name))?;
    print_outcome(name, &outcome, json)
}

/// Handle resume command
pub async fn handle_resume(
    config: Option<PathBuf>,
    queue: String,
    url: String,
    json: bool,
) -> Result<()> {
    let name = parse_queue_name(&queue)?;
    let url = Url::parse(&url).with_context(|| format!("Invalid page URL '{}'", url))?;
    let session = Session::load(config)?;

    if !QueueRunner::should_resume(session.storage.as_ref(), name.as_str()) {
        bail!(
            "No '{}' queue in progress. Use 'gdprq start {}' to begin one.",
            name,
            name
        );
    }

    let context = session.context(name, Some(url), None)?;
    let outcome = session
        .drive(name, context, false)
        .await
        .with_context(|| format!("Failed to resume queue '{}'", name))?;
    print_outcome(name, &outcome, json)
}

/// Handle status command
pub fn handle_status(config: Option<PathBuf>, queue: String, json: bool) -> Result<()> {
    let name = parse_queue_name(&queue)?;
    let session = Session::load(config)?;
    let context = session.context(name, None, None)?;
    let definitions = gdprq_core::gdpr::build_queue(name, &context);

    let controller = match load_queue(session.storage.as_ref(), name.as_str(), &definitions) {
        Some(entries) => Some(QueueController::new(entries)?),
        None => None,
    };

    if json {
        let output = match &controller {
            Some(controller) => serde_json::json!({
                "queue": name.as_str(),
                "stored": true,
                "finished": controller.is_finished(),
                "actions": controller.get_queue().iter().map(action_json).collect::<Vec<_>>(),
            }),
            None => serde_json::json!({
                "queue": name.as_str(),
                "stored": false,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let controller = match controller {
        Some(controller) => controller,
        None => {
            println!("No stored state for queue '{}'", name);
            return Ok(());
        }
    };

    println!("Queue Status: {}", name);
    println!("========================");
    println!(
        "Progress:  {}/{} complete{}",
        controller.get_complete().len(),
        controller.len(),
        if controller.is_finished() { " (finished)" } else { "" }
    );
    println!();
    for action in controller.get_queue() {
        let line = format!(
            "  {:<36} {:<9} {}",
            action.action_type(),
            action.status().label(),
            format_timestamp(action.updated_at())
        );
        match action.error_message() {
            Some(message) => println!("{}  error: {}", line, message),
            None => println!("{}", line),
        }
    }

    Ok(())
}

/// Handle reset command
pub fn handle_reset(config: Option<PathBuf>, queue: String, json: bool) -> Result<()> {
    let name = parse_queue_name(&queue)?;
    let session = Session::load(config)?;

    remove_queue(session.storage.as_ref(), name.as_str())
        .with_context(|| format!("Failed to reset queue '{}'", name))?;

    if json {
        let output = serde_json::json!({ "queue": name.as_str(), "status": "reset" });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Queue '{}' reset", name);
    }
    Ok(())
}

/// Handle queues command
///
/// Provider names come from the configuration when one can be read;
/// otherwise the defaults are listed.
pub fn handle_queues(config: Option<PathBuf>, json: bool) -> Result<()> {
    let config = match config {
        Some(path) => Configuration::load_from_file(&path)
            .map_err(|e| anyhow!("Failed to load config {}: {}", path.display(), e))?,
        None => Configuration::default_config_path()
            .ok()
            .and_then(|path| Configuration::load_from_file(&path).ok())
            .unwrap_or_default(),
    };
    let providers: Vec<&str> = config.auth.iter().map(|a| a.name.as_str()).collect();

    if json {
        let output: Vec<_> = QueueName::ALL
            .iter()
            .map(|name| {
                serde_json::json!({
                    "name": name.as_str(),
                    "actions": name.action_types(&providers),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Available queues");
    println!("================");
    for name in QueueName::ALL {
        println!();
        println!("{}", name);
        for (i, action_type) in name.action_types(&providers).iter().enumerate() {
            println!("  {:>2}. {}", i + 1, action_type);
        }
    }
    Ok(())
}

/// Handle config --init command
pub fn handle_config_init(config: Option<PathBuf>) -> Result<()> {
    let config_path = config_path(config)?;
    let config = if config_path.exists() {
        println!("Configuration file already exists. Keeping existing values...");
        Configuration::load_from_file(&config_path)
            .map_err(|e| anyhow!("Failed to load existing config: {}", e))?
    } else {
        Configuration::default()
    };

    config
        .save_to_file(&config_path)
        .map_err(|e| anyhow!("Failed to save config: {}", e))?;
    println!("Configuration saved to {}", config_path.display());
    Ok(())
}

fn print_outcome(name: QueueName, outcome: &RunOutcome, json: bool) -> Result<()> {
    match outcome {
        RunOutcome::Completed { results } => {
            if json {
                let results: serde_json::Map<String, serde_json::Value> =
                    results.iter().cloned().collect();
                let output = serde_json::json!({
                    "queue": name.as_str(),
                    "status": "completed",
                    "results": results,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("✅ Queue '{}' completed", name);
                if let Some(path) = outcome.result(DOWNLOAD_AS_FILE).and_then(|v| v.as_str()) {
                    println!("   Profile data saved to {}", path);
                }
            }
            Ok(())
        }
        RunOutcome::Redirect { action_type, url } => {
            if json {
                let output = serde_json::json!({
                    "queue": name.as_str(),
                    "status": "redirect",
                    "action": action_type,
                    "url": url.as_str(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("🔑 Open this URL in a browser to continue:");
                println!("   {}", url);
                println!();
                println!(
                    "After signing in, run 'gdprq resume {} --url <callback URL>'",
                    name
                );
            }
            Ok(())
        }
        RunOutcome::Failed {
            action_type,
            error_message,
        } => {
            if json {
                let output = serde_json::json!({
                    "queue": name.as_str(),
                    "status": "failed",
                    "action": action_type,
                    "error": error_message,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            bail!(
                "Queue '{}' failed at {}: {}. Use 'gdprq reset {}' to start over.",
                name,
                action_type,
                error_message,
                name
            )
        }
    }
}

fn action_json(action: &Action) -> serde_json::Value {
    serde_json::json!({
        "type": action.action_type(),
        "status": action.status().label(),
        "updated_at": format_timestamp(action.updated_at()),
        "error": action.error_message(),
    })
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
