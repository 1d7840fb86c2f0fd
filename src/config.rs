use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::AuditError;

/// Repository-local list of packages to treat as allow-listed.
pub const IGNORE_FILE: &str = ".license-ignore.toml";

/// Root configuration, deserialized from `.license-auditr/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub license: LicenseConfig,
    pub pip: PipConfig,
    pub apt: AptConfig,
}

/// Global license allow-list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LicenseConfig {
    /// Case-insensitive regexes matched against the whole license name.
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipConfig {
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    /// Interpreter version used for environment markers, e.g. `3.10.12`.
    /// Detected from `python3 --version` when unset.
    pub python_version: Option<String>,
    /// Replacement for the bundled isolated-install script.
    pub install_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AptConfig {
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub cache_path: Option<PathBuf>,
}

impl Default for LicenseConfig {
    /// Common permissive licenses, in the spellings pip-licenses and Debian
    /// copyright files use.
    fn default() -> Self {
        let allowlist = [
            "MIT.*",
            "Expat",
            "BSD.*",
            "3-Clause BSD License",
            "Apache.*",
            "ISC.*",
            "Python Software Foundation.*",
            "PSF.*",
            "Zlib",
            "Historical Permission Notice and Disclaimer.*",
            "Public Domain",
            "Unlicense",
            "CC0.*",
        ];
        Self {
            allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AptConfig {
    /// Directory holding cached copyright files. `~` expands to the home
    /// directory; defaults to the user cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_path {
            Some(path) => expand_home(path),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("license-auditr")
                .join("apt"),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Load the policy configuration, searching in order:
///
/// 1. `config_override` (`--config`)
/// 2. `<repository>/.license-auditr/config.toml`
/// 3. `~/.config/license-auditr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(repository: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return Ok(read_config(path)?);
    }

    let project_config = repository.join(".license-auditr").join("config.toml");
    if project_config.exists() {
        return Ok(read_config(&project_config)?);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(".config")
            .join("license-auditr")
            .join("config.toml");
        if home_config.exists() {
            return Ok(read_config(&home_config)?);
        }
    }

    debug!("No config file found, using built-in policy");
    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config, AuditError> {
    let err = |details: String| AuditError::Config {
        path: path.to_path_buf(),
        details,
    };
    let content = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let config = parse_config(&content).map_err(|e| err(e.to_string()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse a config document, warning about keys that are not understood.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Table = toml::from_str(content)?;
    for key in unknown_keys(&raw) {
        warn!("Unknown config key `{}` is ignored", key);
    }
    Ok(toml::from_str(content)?)
}

fn unknown_keys(raw: &toml::Table) -> Vec<String> {
    const SECTIONS: &[(&str, &[&str])] = &[
        ("license", &["allowlist"]),
        ("pip", &["allowlist", "denylist", "python_version", "install_script"]),
        ("apt", &["allowlist", "denylist", "cache_path"]),
    ];

    let mut unknown = Vec::new();
    for (section, value) in raw {
        let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == section.as_str()) else {
            unknown.push(section.clone());
            continue;
        };
        if let Some(table) = value.as_table() {
            for key in table.keys() {
                if !known.contains(&key.as_str()) {
                    unknown.push(format!("{}.{}", section, key));
                }
            }
        }
    }
    unknown
}

/// Packages a repository asks to ignore, per ecosystem.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IgnoreFile {
    pub pip: Vec<String>,
    pub apt: Vec<String>,
}

/// Merge `<repository>/.license-ignore.toml` into the package lists.
///
/// Ignored packages join the allow-list and leave the deny-list. An
/// unreadable or unparseable file is skipped with a warning.
pub fn apply_ignore_file(config: &mut Config, repository: &Path) {
    let path = repository.join(IGNORE_FILE);
    if !path.exists() {
        return;
    }

    let ignore: IgnoreFile = match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|s| toml::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(ignore) => ignore,
        Err(e) => {
            warn!("Couldn't parse ignore file {}: {}. Skipping.", path.display(), e);
            return;
        }
    };

    merge_ignored(&mut config.pip.allowlist, &mut config.pip.denylist, &ignore.pip);
    merge_ignored(&mut config.apt.allowlist, &mut config.apt.denylist, &ignore.apt);
}

fn merge_ignored(allowlist: &mut Vec<String>, denylist: &mut Vec<String>, ignored: &[String]) {
    if ignored.is_empty() {
        return;
    }

    let merged: BTreeSet<String> = allowlist.iter().chain(ignored).cloned().collect();
    *allowlist = merged.into_iter().collect();

    denylist.retain(|p| {
        let keep = !ignored.contains(p);
        if !keep {
            warn!(
                "Found package {} in the repository ignore list, it's also on the denylist. \
                 The ignore list takes precedence: removing from denylist.",
                p
            );
        }
        keep
    });
}
