//! Layered configuration.
//!
//! Layers are merged field-by-field, narrowest wins: built-in defaults,
//! then the user config directory, then each ancestor directory from the
//! filesystem root down to (but not including) the repository root, then
//! the repository root itself, then the current working directory, then
//! environment variables, then CLI flags. Each layer is optional — a
//! missing or unparsable file just means that layer contributes nothing
//! (explicit `--config PATH` is the only layer that turns a parse failure
//! into a hard error).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Fully resolved configuration, after every layer has been merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub parallelism: usize,
    pub cache_dir: PathBuf,
    pub log_level: String,
    pub watch_debounce_ms: u64,
    pub cache_ttl_days: u64,
    pub solution_grouping: SolutionGroupingMode,
    pub color: ColorMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolutionGroupingMode {
    Strict,
    BestFit,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            parallelism: num_cpus::get(),
            cache_dir: PathBuf::from(".donotnet/cache"),
            log_level: "info".to_string(),
            watch_debounce_ms: 100,
            cache_ttl_days: 30,
            solution_grouping: SolutionGroupingMode::BestFit,
            color: ColorMode::Auto,
        }
    }
}

/// The same fields as [`Config`], but every field optional — only the
/// settings a given layer actually specifies are `Some`. Layers are
/// combined with [`PartialConfig::merge`], narrower layer wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialConfig {
    pub parallelism: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub watch_debounce_ms: Option<u64>,
    pub cache_ttl_days: Option<u64>,
    pub solution_grouping: Option<SolutionGroupingMode>,
    pub color: Option<ColorMode>,
}

impl PartialConfig {
    /// Overlay `other` (narrower / later layer) onto `self`, with `other`'s
    /// `Some` values winning.
    pub fn merge(self, other: PartialConfig) -> PartialConfig {
        PartialConfig {
            parallelism: other.parallelism.or(self.parallelism),
            cache_dir: other.cache_dir.or(self.cache_dir),
            log_level: other.log_level.or(self.log_level),
            watch_debounce_ms: other.watch_debounce_ms.or(self.watch_debounce_ms),
            cache_ttl_days: other.cache_ttl_days.or(self.cache_ttl_days),
            solution_grouping: other.solution_grouping.or(self.solution_grouping),
            color: other.color.or(self.color),
        }
    }

    pub fn resolve(self) -> Config {
        let defaults = Config::default();
        Config {
            parallelism: self.parallelism.unwrap_or(defaults.parallelism),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            watch_debounce_ms: self.watch_debounce_ms.unwrap_or(defaults.watch_debounce_ms),
            cache_ttl_days: self.cache_ttl_days.unwrap_or(defaults.cache_ttl_days),
            solution_grouping: self.solution_grouping.unwrap_or(defaults.solution_grouping),
            color: self.color.unwrap_or(defaults.color),
        }
    }
}

/// Config file names searched for in each directory layer, in precedence
/// order when more than one is present in the same directory.
const CONFIG_FILE_STEMS: &[&str] = &["donotnet"];

/// Parse a single config file by its extension: `.toml` (default when no
/// recognized extension is present), `.yaml`/`.yml`, or `.json`.
fn parse_layer(path: &Path) -> Result<PartialConfig> {
    let content = std::fs::read_to_string(path).map_err(CoreError::Io)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParseFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        "json" => serde_json::from_str(&content).map_err(|e| CoreError::ConfigParseFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        _ => toml::from_str(&content).map_err(|e| CoreError::ConfigParseFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Find the first config file present in `dir` across the recognized
/// stems/extensions, parse it if found. Non-fatal: parse failures are
/// logged by the caller and treated as "layer contributes nothing",
/// except for the explicit `--config` layer (see [`load_explicit`]).
fn find_and_parse_layer(dir: &Path) -> Option<PartialConfig> {
    for stem in CONFIG_FILE_STEMS {
        for ext in ["toml", "yaml", "yml", "json"] {
            let candidate = dir.join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                match parse_layer(&candidate) {
                    Ok(partial) => return Some(partial),
                    Err(_) => {
                        tracing::warn!(path = %candidate.display(), "skipping unparsable config layer");
                        return None;
                    }
                }
            }
        }
    }
    None
}

/// Load an explicitly requested `--config PATH`: parse failures here are
/// fatal, unlike the implicit directory layers.
pub fn load_explicit(path: &Path) -> Result<PartialConfig> {
    parse_layer(path).map_err(|e| match e {
        CoreError::ConfigParseFailure { path, reason } => {
            CoreError::ConfigParseFailureExplicit { path, reason }
        }
        other => other,
    })
}

/// Environment variable layer: `DONOTNET_PARALLELISM=4`,
/// `DONOTNET_SOLUTION_GROUPING=strict`, etc. Double underscores denote
/// nesting (`DONOTNET_CACHE__TTL_DAYS` -> `cache.ttl_days`), reserved for
/// future nested sections; today's flat field set needs only the single
/// segment after the prefix.
pub fn load_from_env(vars: impl IntoIterator<Item = (String, String)>) -> PartialConfig {
    const PREFIX: &str = "DONOTNET_";
    let mut map: HashMap<String, String> = HashMap::new();
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(PREFIX) {
            let normalized = stripped.replace("__", ".").to_lowercase();
            map.insert(normalized, value);
        }
    }

    PartialConfig {
        parallelism: map.get("parallelism").and_then(|v| v.parse().ok()),
        cache_dir: map.get("cache_dir").map(PathBuf::from),
        log_level: map.get("log_level").cloned(),
        watch_debounce_ms: map.get("watch_debounce_ms").and_then(|v| v.parse().ok()),
        cache_ttl_days: map.get("cache_ttl_days").and_then(|v| v.parse().ok()),
        solution_grouping: map.get("solution_grouping").and_then(|v| match v.as_str() {
            "strict" => Some(SolutionGroupingMode::Strict),
            "best-fit" | "best_fit" => Some(SolutionGroupingMode::BestFit),
            "off" => Some(SolutionGroupingMode::Off),
            _ => None,
        }),
        color: map.get("color").and_then(|v| match v.as_str() {
            "always" => Some(ColorMode::Always),
            "never" => Some(ColorMode::Never),
            "auto" => Some(ColorMode::Auto),
            _ => None,
        }),
    }
}

/// Run the full layer chain: defaults are implicit in
/// [`PartialConfig::resolve`]; everything here is merged on top, in
/// increasing precedence order.
///
/// `user_config_dir` is typically `dirs::config_dir()/donotnet`.
/// `ancestor_dirs` should already be ordered from filesystem root down to
/// (excluding) `repo_root`; `repo_root` and `cwd` are merged after it.
pub fn load_layers(
    user_config_dir: Option<&Path>,
    ancestor_dirs: &[PathBuf],
    repo_root: &Path,
    cwd: &Path,
    env_vars: impl IntoIterator<Item = (String, String)>,
    explicit: Option<PartialConfig>,
    cli_overrides: PartialConfig,
) -> PartialConfig {
    let mut merged = PartialConfig::default();

    if let Some(dir) = user_config_dir {
        if let Some(layer) = find_and_parse_layer(dir) {
            merged = merged.merge(layer);
        }
    }

    for dir in ancestor_dirs {
        if let Some(layer) = find_and_parse_layer(dir) {
            merged = merged.merge(layer);
        }
    }

    if let Some(layer) = find_and_parse_layer(repo_root) {
        merged = merged.merge(layer);
    }

    if cwd != repo_root {
        if let Some(layer) = find_and_parse_layer(cwd) {
            merged = merged.merge(layer);
        }
    }

    merged = merged.merge(load_from_env(env_vars));

    if let Some(explicit) = explicit {
        merged = merged.merge(explicit);
    }

    merged.merge(cli_overrides)
}

/// Every ancestor directory of `start`, from the filesystem root down to
/// (but excluding) `stop_before`. Used to build the `ancestor_dirs`
/// argument to [`load_layers`] (the "parent directories" layer).
pub fn ancestor_dirs(start: &Path, stop_before: &Path) -> Vec<PathBuf> {
    if start == stop_before {
        return Vec::new();
    }
    let mut dirs = Vec::new();
    let mut current = start.to_path_buf();
    while let Some(parent) = current.parent() {
        if parent == stop_before {
            break;
        }
        dirs.push(parent.to_path_buf());
        current = parent.to_path_buf();
    }
    dirs.reverse();
    dirs
}
