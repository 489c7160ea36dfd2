//! Loads a saved holder section and writes it back out.
//!
//! Usage: `plugkeys <section file>`. No definitions are loaded, so only
//! plugins saved without a definition (and tags) survive; everything else is
//! reported line by line. Settings come from `plugkeys.toml` (or the file named
//! by `PLUGKEYS_CONFIG`) and `PLUGKEYS_*` environment variables.

use std::env;
use std::fs;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plugkeys::def::DefCatalog;
use plugkeys::dispatch::sink_for;
use plugkeys::error::{PlugError, Result};
use plugkeys::holder::PluginHolder;
use plugkeys::key::KeySpace;
use plugkeys::persist::{load_lines, parse_section, save_holder, write_section};
use plugkeys::settings::Settings;

fn run(settings: &Settings, path: &str) -> Result<()> {
    let text = fs::read_to_string(path)?;
    let keys = Arc::new(KeySpace::from_settings(settings));
    let catalog = DefCatalog::new();
    let mut holder = PluginHolder::new(Arc::clone(&keys), sink_for(settings.diagnostics));

    let lines = parse_section(&text)?;
    let loaded = load_lines(&mut holder, &catalog, &lines);
    info!(path, lines = lines.len(), loaded, plugins = holder.len(), "section loaded");

    let saved = save_holder(&holder)?;
    write_section(&mut io::stdout().lock(), path, &saved)
}

fn main() -> ExitCode {
    let settings = match Settings::load(env::var("PLUGKEYS_CONFIG").ok().as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let Some(path) = env::args().nth(1) else {
        error!("usage: plugkeys <section file>");
        return ExitCode::FAILURE;
    };
    match run(&settings, &path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(PlugError::Parse { message, line }) => {
            error!(path = %path, line, error = %message, "malformed section");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(path = %path, error = %e, "failed");
            ExitCode::FAILURE
        }
    }
}
