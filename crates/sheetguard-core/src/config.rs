use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::types::Severity;

pub const CONFIG_FILE_NAME: &str = ".sheetguard.toml";

/// Top-level configuration from `.sheetguard.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub cycles: CycleConfig,
    #[serde(default)]
    pub constants: ConstantsConfig,
    #[serde(default)]
    pub volatile: VolatileConfig,
    #[serde(default)]
    pub orphans: OrphanConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

/// How range references become edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Bounded ranges with at most this many cells are expanded into per-cell edges.
    #[serde(default = "default_expand_threshold")]
    pub expand_threshold: u64,
    /// Link large and unbounded range pseudo-nodes to the formula cells they cover.
    #[serde(default = "default_true")]
    pub link_formula_cells: bool,
}

fn default_expand_threshold() -> u64 {
    256
}

fn default_true() -> bool {
    true
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            expand_threshold: default_expand_threshold(),
            link_formula_cells: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Strongly connected components larger than this are reported as one cluster.
    #[serde(default = "default_cluster_threshold")]
    pub cluster_threshold: usize,
    #[serde(default = "default_max_cycles")]
    pub max_cycles_per_component: usize,
}

fn default_cluster_threshold() -> usize {
    12
}

fn default_max_cycles() -> usize {
    64
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: default_cluster_threshold(),
            max_cycles_per_component: default_max_cycles(),
        }
    }
}

/// Allow-list for hard-coded literals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantsConfig {
    #[serde(default = "default_allowed_numbers")]
    pub allowed_numbers: Vec<f64>,
    #[serde(default = "default_allowed_strings")]
    pub allowed_strings: Vec<String>,
    #[serde(default = "default_true")]
    pub flag_strings: bool,
    /// Literals directly inside these functions are structural arguments.
    #[serde(default = "default_ignore_functions")]
    pub ignore_functions: Vec<String>,
}

fn default_allowed_numbers() -> Vec<f64> {
    vec![0.0, 1.0, -1.0]
}

fn default_allowed_strings() -> Vec<String> {
    vec![String::new()]
}

fn default_ignore_functions() -> Vec<String> {
    [
        "ROUND",
        "ROUNDUP",
        "ROUNDDOWN",
        "INDEX",
        "MATCH",
        "CHOOSE",
        "VLOOKUP",
        "HLOOKUP",
        "XLOOKUP",
        "LARGE",
        "SMALL",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ConstantsConfig {
    fn default() -> Self {
        Self {
            allowed_numbers: default_allowed_numbers(),
            allowed_strings: default_allowed_strings(),
            flag_strings: true,
            ignore_functions: default_ignore_functions(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolatileConfig {
    /// Extra function names treated as volatile (for add-in functions).
    #[serde(default)]
    pub additional_functions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanConfig {
    /// Glob patterns over sheet names.
    #[serde(default)]
    pub exclude_sheets: Vec<String>,
    /// Skip cells on the final row or column of the used range (totals).
    #[serde(default)]
    pub exclude_last_row_or_col: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    #[serde(default = "default_min_dominant_ratio")]
    pub min_dominant_ratio: f64,
}

fn default_min_group_size() -> usize {
    3
}

fn default_min_dominant_ratio() -> f64 {
    0.5
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            min_group_size: default_min_group_size(),
            min_dominant_ratio: default_min_dominant_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Upper bound on nodes visited per reverse traversal.
    #[serde(default = "default_max_visited")]
    pub max_visited: usize,
}

fn default_top_n() -> usize {
    10
}

fn default_max_visited() -> usize {
    200_000
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            max_visited: default_max_visited(),
        }
    }
}

/// Rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
    /// Per-category severity overrides, keyed by snake_case category name.
    #[serde(default)]
    pub severities: HashMap<String, Severity>,
}

fn default_fail_on() -> Severity {
    Severity::High
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            fail_on: default_fail_on(),
            severities: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a `.sheetguard.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content).with_context(|| {
            format!(
                "failed to parse '{}'. Run `sheetguard init` to create a valid config file",
                path.display()
            )
        })?;
        Ok(config)
    }

    /// Load from `.sheetguard.toml` in the given directory or any ancestor, or
    /// return defaults.
    pub fn load_or_default(dir: &Path) -> Self {
        let start = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mut current = start.as_path();
        loop {
            let config_path = current.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(
                            path = %config_path.display(),
                            "failed to load config: {e:#}. Using defaults."
                        );
                        Self::default()
                    }
                };
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Self::default()
    }

    /// Generate default TOML content for `sheetguard init`.
    pub fn default_toml() -> String {
        r#"# SheetGuard - Spreadsheet Structural Risk Configuration

[graph]
# Bounded ranges up to this many cells become one edge per cell;
# larger ranges point at a single range node
expand_threshold = 256
link_formula_cells = true

[cycles]
# Circular groups larger than this are reported as one cluster
cluster_threshold = 12
max_cycles_per_component = 64

[constants]
# Literals that are never reported as hard-coded
allowed_numbers = [0, 1, -1]
allowed_strings = [""]
flag_strings = true
ignore_functions = ["ROUND", "ROUNDUP", "ROUNDDOWN", "INDEX", "MATCH", "CHOOSE", "VLOOKUP", "HLOOKUP", "XLOOKUP", "LARGE", "SMALL"]

[volatile]
# additional_functions = ["MYADDIN.NOW"]

[orphans]
# exclude_sheets = ["Scratch*", "Notes"]
exclude_last_row_or_col = false

[drift]
min_group_size = 3
min_dominant_ratio = 0.5

[impact]
top_n = 10
max_visited = 200000

[rules]
# Severity levels: "high", "medium", "low"
fail_on = "high"

# [rules.severities]
# hardcoded_constant = "low"
# external_reference = "medium"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graph.expand_threshold, 256);
        assert_eq!(config.cycles.cluster_threshold, 12);
        assert_eq!(config.constants.allowed_numbers, vec![0.0, 1.0, -1.0]);
        assert!(config.constants.ignore_functions.contains(&"ROUND".to_string()));
        assert_eq!(config.rules.fail_on, Severity::High);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let toml_str = r#"
[constants]
allowed_numbers = [0, 1, -1, 100]

[rules]
fail_on = "medium"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.constants.allowed_numbers.len(), 4);
        assert!(config.constants.flag_strings, "unset field keeps default");
        assert_eq!(config.drift.min_group_size, 3);
        assert_eq!(config.rules.fail_on, Severity::Medium);
    }

    #[test]
    fn test_default_toml_is_valid() {
        let toml_str = Config::default_toml();
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.impact.max_visited, 200_000);
        assert!(config.graph.link_formula_cells);
    }

    #[test]
    fn test_severity_overrides_deserialize() {
        let toml_str = r#"
[rules.severities]
hardcoded_constant = "low"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.rules.severities.get("hardcoded_constant"),
            Some(&Severity::Low)
        );
    }

    #[test]
    fn test_load_or_default_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[drift]\nmin_group_size = 5\n",
        )
        .unwrap();
        let nested = dir.path().join("models").join("2024");
        std::fs::create_dir_all(&nested).unwrap();
        let config = Config::load_or_default(&nested);
        assert_eq!(config.drift.min_group_size, 5);
    }

    #[test]
    fn test_malformed_discovered_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[drift\n").unwrap();
        let config = Config::load_or_default(dir.path());
        assert_eq!(config.drift.min_group_size, 3);
        assert!(Config::load(&dir.path().join(CONFIG_FILE_NAME)).is_err());
    }
}
