//! Resolves workspace root, policy path, profile, and strict mode from
//! CLI flags, environment variables, an optional config file, and
//! built-in defaults, in that precedence order.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

const VALID_PROFILES: &[&str] = &["dev", "ci", "read_only"];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub workspace_root: PathBuf,
    pub policy_path: Option<PathBuf>,
    pub profile: String,
    pub strict: bool,
}

/// What a `--config <path>` file or CLI flags may supply; any field left
/// `None` falls through to the next layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfigLayer {
    pub workspace_root: Option<PathBuf>,
    pub policy_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub strict: Option<bool>,
}

/// Parses the loose boolean vocabulary accepted throughout the CLI/env
/// layer: `1/true/yes/y/on` and their negatives, case-insensitively.
pub fn norm_bool(value: &str) -> Result<Option<bool>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "n" | "off" => Ok(Some(false)),
        other => Err(ConfigError(format!("invalid boolean value: {other}"))),
    }
}

fn env_layer() -> Result<RuntimeConfigLayer, ConfigError> {
    let workspace_root = env::var("WORKSPACE_ROOT").ok().map(PathBuf::from);
    let policy_path = env::var("POLICY_PATH").ok().map(PathBuf::from);
    let profile = env::var("PROFILE").ok();
    let strict = match env::var("STRICT_MODE") {
        Ok(raw) => norm_bool(&raw)?,
        Err(_) => None,
    };
    Ok(RuntimeConfigLayer {
        workspace_root,
        policy_path,
        profile,
        strict,
    })
}

fn file_layer(config_file: Option<&Path>) -> Result<RuntimeConfigLayer, ConfigError> {
    let Some(path) = config_file else {
        return Ok(RuntimeConfigLayer::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {e}", path.display())))?;
    let parsed: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("failed to parse config {}: {e}", path.display())))?;
    let value = serde_json::to_value(parsed)
        .map_err(|e| ConfigError(format!("invalid config {}: {e}", path.display())))?;
    serde_json::from_value(value)
        .map_err(|e| ConfigError(format!("invalid config {}: {e}", path.display())))
}

fn apply_layer(base: RuntimeConfigLayer, overlay: RuntimeConfigLayer) -> RuntimeConfigLayer {
    RuntimeConfigLayer {
        workspace_root: overlay.workspace_root.or(base.workspace_root),
        policy_path: overlay.policy_path.or(base.policy_path),
        profile: overlay.profile.or(base.profile),
        strict: overlay.strict.or(base.strict),
    }
}

/// CLI > env > config file > defaults. `cli` should carry only the flags
/// the caller actually passed (everything else `None`).
pub fn load_runtime_config(
    cli: RuntimeConfigLayer,
    config_file: Option<&Path>,
) -> Result<RuntimeConfig, ConfigError> {
    let defaults = RuntimeConfigLayer {
        workspace_root: Some(env::current_dir().map_err(|e| ConfigError(e.to_string()))?),
        policy_path: None,
        profile: Some("dev".to_string()),
        strict: Some(false),
    };

    let merged = apply_layer(defaults, file_layer(config_file)?);
    let merged = apply_layer(merged, env_layer()?);
    let merged = apply_layer(merged, cli);

    let profile = merged.profile.unwrap_or_else(|| "dev".to_string());
    if !VALID_PROFILES.contains(&profile.as_str()) {
        return Err(ConfigError(format!(
            "invalid profile '{profile}': must be one of {VALID_PROFILES:?}"
        )));
    }

    let workspace_root = merged
        .workspace_root
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .map_err(|e| ConfigError(format!("invalid workspace root: {e}")))?;

    let policy_path = match merged.policy_path {
        Some(p) => Some(
            p.canonicalize()
                .map_err(|e| ConfigError(format!("invalid policy path: {e}")))?,
        ),
        None => None,
    };

    Ok(RuntimeConfig {
        workspace_root,
        policy_path,
        profile,
        strict: merged.strict.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_bool_accepts_known_truthy_and_falsy_spellings() {
        assert_eq!(norm_bool("YES").unwrap(), Some(true));
        assert_eq!(norm_bool("off").unwrap(), Some(false));
        assert_eq!(norm_bool("").unwrap(), None);
        assert!(norm_bool("maybe").is_err());
    }

    #[test]
    fn cli_overrides_beat_defaults() {
        let cli = RuntimeConfigLayer {
            profile: Some("ci".to_string()),
            ..Default::default()
        };
        let resolved = load_runtime_config(cli, None).unwrap();
        assert_eq!(resolved.profile, "ci");
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let cli = RuntimeConfigLayer {
            profile: Some("bogus".to_string()),
            ..Default::default()
        };
        assert!(load_runtime_config(cli, None).is_err());
    }
}
