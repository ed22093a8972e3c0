use anyhow::Result;
use chrono::Utc;
use hmckit::MemoryConsole;

use crate::Context;
use crate::config::{Config, config_dir};
use crate::ui;

pub fn show(ctx: &Context) -> Result<()> {
    ui::header("Configuration");

    let path = Config::path()?;
    ui::kv("Config directory", &config_dir()?.display().to_string());
    if path.exists() {
        ui::kv("Config file", &path.display().to_string());
    } else {
        ui::kv("Config file", &format!("{} (not found, using defaults)", path.display()));
    }

    let config = &ctx.config;
    ui::kv("Default CPC", config.default_cpc.as_deref().unwrap_or("-"));
    let options = config.options(None);
    ui::kv("Status timeout", &format!("{}s", options.status_timeout.as_secs()));
    ui::kv("Poll interval", &format!("{}ms", options.poll_interval.as_millis()));
    ui::kv("Assume yes", if config.assume_yes { "yes" } else { "no" });

    ui::header("Inventory");
    ui::kv("Path", &ctx.inventory.display().to_string());
    if !ctx.inventory.exists() {
        ui::warn("Inventory file does not exist");
        return Ok(());
    }
    match MemoryConsole::load(&ctx.inventory) {
        Ok(console) => {
            ui::kv("Resources", &console.len().to_string());
            let saved = console
                .saved_at()
                .map_or_else(|| "never".to_string(), |ts| ui::format_age(ts, Utc::now()));
            ui::kv("Last saved", &saved);
        }
        Err(e) => ui::error(&format!("Could not load inventory: {e}")),
    }
    Ok(())
}
