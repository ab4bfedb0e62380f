use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::AppHostConfig;

/// File name looked up in the working directory and the config directory
pub const CONFIG_FILE: &str = "apphost.toml";

/// Environment variables starting with this prefix supply parameter values
pub const PARAMETER_ENV_PREFIX: &str = "Parameters__";

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("apphost"))
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(path).with_context(|| format!("Could not expand path '{path}'"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Find the declaration file
///
/// An explicit path wins; otherwise `./apphost.toml`, then
/// `~/.config/apphost/apphost.toml`.
pub fn locate(explicit: Option<&str>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Could not determine working directory")?;
    locate_in(explicit, &cwd, &config_dir()?)
}

fn locate_in(explicit: Option<&str>, cwd: &Path, config_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = expand_path(path)?;
        if !path.exists() {
            bail!("Declaration file not found: {}", path.display());
        }
        return Ok(path);
    }

    let candidates = [cwd.join(CONFIG_FILE), config_dir.join(CONFIG_FILE)];
    for candidate in &candidates {
        if candidate.exists() {
            log::debug!("using declaration file {}", candidate.display());
            return Ok(candidate.clone());
        }
    }
    bail!(
        "No {CONFIG_FILE} found in {} or {}; pass --file",
        cwd.display(),
        config_dir.display()
    )
}

/// Read and parse a declaration file
pub fn load(path: &Path) -> Result<AppHostConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read declaration file: {}", path.display()))?;
    AppHostConfig::parse(&content).with_context(|| format!("In {}", path.display()))
}

/// Parse a `NAME=VALUE` command-line parameter
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name cannot be empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Collect supplied parameter values
///
/// Command-line values win over `Parameters__<NAME>` environment variables.
/// Variables that are not valid UTF-8 are skipped.
pub fn parameter_values<I>(cli: &[(String, String)], env: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut values: BTreeMap<String, String> = env
        .into_iter()
        .filter_map(|(key, value)| {
            let name = key
                .to_str()?
                .strip_prefix(PARAMETER_ENV_PREFIX)
                .filter(|name| !name.is_empty())?
                .to_string();
            match value.into_string() {
                Ok(value) => Some((name, value)),
                Err(_) => {
                    log::warn!("ignoring {PARAMETER_ENV_PREFIX}{name}: value is not valid UTF-8");
                    None
                }
            }
        })
        .collect();
    for (name, value) in cli {
        values.insert(name.clone(), value.clone());
    }
    values
}
