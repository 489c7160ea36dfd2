//! Textual persistence of holders.
//!
//! A saved holder is a section of `name = value` lines:
//! * `@@<plugin key> = {"def": ..., "fields": {...}}` for listed plugins and
//!   `@@<plugin key>* = ...` for simple ones;
//! * `tag.<tag key> = <json>` for tags.
//!
//! [`load_line`] answers `Ok(false)` for anything else so that the caller can
//! hand the line to whoever else understands it.

use std::io::Write;

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::def::DefCatalog;
use crate::error::{PlugError, Result};
use crate::holder::PluginHolder;
use crate::key::{KeyRegistry, PluginKey, PluginKind};
use crate::plugin::Plugin;

pub const PLUGIN_KEY_PREFIX: &str = "@@";
pub const SIMPLE_SUFFIX: &str = "*";
pub const TAG_PREFIX: &str = "tag.";

lazy_static! {
    // registries trim trailing whitespace, so the empty name `@@` is a key too
    static ref PLUGIN_KEY_RE: Regex = Regex::new(r"(?is)^@@(?P<value>.*?)\s*$").unwrap();
    static ref PLUGIN_LINE_RE: Regex = Regex::new(r"(?i)^@@(?P<name>.*?)(?P<asterisk>\*)?\s*$").unwrap();
    static ref TAG_LINE_RE: Regex = Regex::new(r"(?i)^tag\.(?P<name>\w+)\s*$").unwrap();
}

// ------------- Codec -------------
/// `@@name` form of plugin keys. Decoding interns names it has not seen yet.
#[derive(Debug, Clone, Copy)]
pub struct PluginKeyCodec<'r> {
    registry: &'r KeyRegistry<PluginKind>,
}

impl<'r> PluginKeyCodec<'r> {
    pub fn new(registry: &'r KeyRegistry<PluginKind>) -> Self {
        Self { registry }
    }
    pub fn encode(&self, key: &PluginKey) -> String {
        format!("{}{}", PLUGIN_KEY_PREFIX, key.name())
    }
    pub fn recognizes(&self, text: &str) -> bool {
        PLUGIN_KEY_RE.is_match(text)
    }
    pub fn decode(&self, text: &str) -> Option<PluginKey> {
        let captures = PLUGIN_KEY_RE.captures(text)?;
        Some(self.registry.get_or_create(&captures["value"]))
    }
}

// ------------- Saving -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPlugin {
    pub def: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SavedPlugin {
    pub fn of(plugin: &Plugin) -> Self {
        Self {
            def: plugin.defname().map(str::to_owned),
            fields: plugin.fields().clone(),
        }
    }
}

// A name the `name = value` line format can carry back to the same key.
fn savable(name: &str) -> Result<()> {
    if name.contains(['=', '\n', '\r']) {
        return Err(PlugError::Parse {
            message: format!("plugin name '{}' can not be saved on a 'name = value' line", name.escape_debug()),
            line: None,
        });
    }
    Ok(())
}

/// The holder as `(name, value)` pairs. Listed plugins come oldest first, so
/// that loading them back (each one is prepended) restores the dispatch order.
///
/// Fails rather than writing a line that would load back as another key:
/// names holding `=` or line breaks, listed plugin names ending in `*` and tag
/// names that are not a single word.
pub fn save_holder(holder: &PluginHolder) -> Result<Vec<(String, String)>> {
    let codec = PluginKeyCodec::new(holder.keys().plugins());
    let mut lines = Vec::new();

    let listed: Vec<_> = holder.plugins().collect();
    for (key, plugin) in listed.into_iter().rev() {
        savable(key.name())?;
        if key.name().ends_with(SIMPLE_SUFFIX) {
            return Err(PlugError::Parse {
                message: format!("plugin name '{}' would load back as a simple plugin", key.name()),
                line: None,
            });
        }
        lines.push((codec.encode(key), serde_json::to_string(&SavedPlugin::of(plugin))?));
    }

    let mut simple: Vec<_> = holder.all_plugins().filter(|(key, _)| holder.is_simple(key)).collect();
    simple.sort_by(|a, b| a.0.name().cmp(b.0.name()));
    for (key, plugin) in simple {
        savable(key.name())?;
        lines.push((
            codec.encode(key) + SIMPLE_SUFFIX,
            serde_json::to_string(&SavedPlugin::of(plugin))?,
        ));
    }

    let mut tags: Vec<_> = holder.tags().collect();
    tags.sort_by(|a, b| a.0.name().cmp(b.0.name()));
    for (key, value) in tags {
        let name = format!("{}{}", TAG_PREFIX, key.name());
        if !TAG_LINE_RE.is_match(&name) {
            return Err(PlugError::Parse {
                message: format!("tag name '{}' is not a single word", key.name().escape_debug()),
                line: None,
            });
        }
        lines.push((name, value.to_string()));
    }
    Ok(lines)
}

pub fn write_section<W: Write>(out: &mut W, header: &str, lines: &[(String, String)]) -> Result<()> {
    writeln!(out, "[{}]", header)?;
    writeln!(out, "// saved {}", Utc::now().to_rfc3339())?;
    for (name, value) in lines {
        writeln!(out, "{} = {}", name, value)?;
    }
    writeln!(out)?;
    Ok(())
}

// ------------- Loading -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLine {
    pub line: usize,
    pub name: String,
    pub value: String,
}

/// Splits a saved section into `name = value` lines. Blank lines, `//` and
/// `;` comments and `[header]` lines are skipped.
pub fn parse_section(text: &str) -> Result<Vec<SectionLine>> {
    let mut lines = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with(';') || trimmed.starts_with('[') {
            continue;
        }
        let Some((name, value)) = trimmed.split_once('=') else {
            return Err(PlugError::Parse {
                message: format!("expected 'name = value', got '{}'", trimmed),
                line: Some(index + 1),
            });
        };
        lines.push(SectionLine {
            line: index + 1,
            name: name.trim().to_owned(),
            value: value.trim().to_owned(),
        });
    }
    Ok(lines)
}

pub fn load_line(holder: &mut PluginHolder, catalog: &DefCatalog, name: &str, value: &str) -> Result<bool> {
    if let Some(captures) = PLUGIN_LINE_RE.captures(name) {
        let key = holder.keys().plugin(&captures["name"]);
        let simple = captures.name("asterisk").is_some();
        let saved: SavedPlugin = serde_json::from_str(value)?;
        let def = match saved.def {
            Some(defname) => Some(catalog.get(&defname).ok_or(PlugError::UnknownDefinition(defname))?),
            None => None,
        };
        holder.restore_plugin(&key, Plugin::restore(def, saved.fields), simple)?;
        return Ok(true);
    }
    if let Some(captures) = TAG_LINE_RE.captures(name) {
        let key = holder.keys().tag(&captures["name"]);
        let value: Value = serde_json::from_str(value)?;
        holder.set_tag(&key, value);
        return Ok(true);
    }
    Ok(false)
}

/// Loads every line it can. Lines that fail, or that nobody here recognizes,
/// are logged with their line number and skipped. Returns how many loaded.
pub fn load_lines(holder: &mut PluginHolder, catalog: &DefCatalog, lines: &[SectionLine]) -> usize {
    let mut loaded = 0;
    for line in lines {
        match load_line(holder, catalog, &line.name, &line.value) {
            Ok(true) => loaded += 1,
            Ok(false) => warn!(line = line.line, name = %line.name, "unrecognized line"),
            Err(e) => warn!(line = line.line, name = %line.name, error = %e, "line not loaded"),
        }
    }
    loaded
}
