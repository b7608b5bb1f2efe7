//! Policy loading: merge the built-in kernel policy with an optional
//! project overlay, validate strictly, and compute the stable policy hash
//! embedded in every response meta block.

use crate::error::ConfigError;
use crate::hashing::canonical_hash;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// The three glob lists used to classify a changed file's risk.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskRules {
    pub high_globs: Vec<String>,
    pub medium_globs: Vec<String>,
    pub low_globs: Vec<String>,
}

/// The validated, hashed policy in force for this process.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub profile: String,
    pub policy_hash: String,
    pub allow_paths: Vec<String>,
    pub deny_globs: Vec<String>,
    pub allow_tasks: BTreeMap<String, Vec<String>>,
    pub max_file_bytes: u64,
    pub max_runtime_seconds: u64,
    pub max_output_bytes: u64,
    pub max_runs: usize,
    pub run_ttl_seconds: i64,
    pub max_bundles: usize,
    pub bundle_ttl_seconds: i64,
    pub max_audit_logs: usize,
    pub audit_ttl_seconds: i64,
    pub risk_rules: RiskRules,
}

const ALLOWED_TOP_KEYS: &[&str] = &["version", "profiles"];
const ALLOWED_PROFILE_KEYS: &[&str] = &[
    "allow_paths",
    "deny_globs",
    "allow_tasks",
    "max_file_bytes",
    "max_runtime_seconds",
    "max_output_bytes",
    "max_runs",
    "run_ttl_seconds",
    "max_bundles",
    "bundle_ttl_seconds",
    "max_audit_logs",
    "audit_ttl_seconds",
    "risk_rules",
];
const ALLOWED_RISK_RULE_KEYS: &[&str] = &["high_globs", "medium_globs", "low_globs"];
const REQUIRED_PROFILE_KEYS: &[&str] = ALLOWED_PROFILE_KEYS;
const REQUIRED_NUMERIC_KEYS: &[&str] = &[
    "max_file_bytes",
    "max_runtime_seconds",
    "max_output_bytes",
    "max_runs",
    "run_ttl_seconds",
    "max_bundles",
    "bundle_ttl_seconds",
    "max_audit_logs",
    "audit_ttl_seconds",
];

/// The policy shipped inside the binary, merged under any project overlay.
/// Mirrors the field defaults of the original `PolicyConfig` dataclass.
const KERNEL_POLICY_YAML: &str = r#"
version: 1
profiles:
  dev:
    allow_paths: ["."]
    deny_globs: [".git/*", "**/.env*", "**/*.pem", "**/*.key"]
    allow_tasks:
      echo: ["echo", "ok"]
    max_file_bytes: 200000
    max_runtime_seconds: 15
    max_output_bytes: 50000
    max_runs: 50
    run_ttl_seconds: 3600
    max_bundles: 50
    bundle_ttl_seconds: 3600
    max_audit_logs: 100
    audit_ttl_seconds: 86400
    risk_rules:
      high_globs: ["*config*", "*.yaml", "*.yml", "*.json", ".env*", "*policy*"]
      medium_globs: ["*.py", "*.ts", "*.js", "*.rs", "*.sh"]
      low_globs: ["*"]
  ci:
    allow_paths: ["."]
    deny_globs: [".git/*", "**/.env*", "**/*.pem", "**/*.key"]
    allow_tasks:
      pytest: ["pytest"]
      ruff: ["ruff", "check", "."]
    max_file_bytes: 200000
    max_runtime_seconds: 30
    max_output_bytes: 50000
    max_runs: 50
    run_ttl_seconds: 3600
    max_bundles: 50
    bundle_ttl_seconds: 3600
    max_audit_logs: 200
    audit_ttl_seconds: 86400
    risk_rules:
      high_globs: ["*config*", "*.yaml", "*.yml", "*.json", ".env*", "*policy*"]
      medium_globs: ["*.py", "*.ts", "*.js", "*.rs", "*.sh"]
      low_globs: ["*"]
  read_only:
    allow_paths: ["."]
    deny_globs: [".git/*", "**/.env*", "**/*.pem", "**/*.key"]
    allow_tasks: {}
    max_file_bytes: 200000
    max_runtime_seconds: 15
    max_output_bytes: 50000
    max_runs: 50
    run_ttl_seconds: 3600
    max_bundles: 50
    bundle_ttl_seconds: 3600
    max_audit_logs: 100
    audit_ttl_seconds: 86400
    risk_rules:
      high_globs: ["*config*", "*.yaml", "*.yml", "*.json", ".env*", "*policy*"]
      medium_globs: ["*.py", "*.ts", "*.js", "*.rs", "*.sh"]
      low_globs: ["*"]
"#;

fn parse_yaml_mapping(raw: &str, source: &str) -> Result<Value, ConfigError> {
    let value: Value = serde_yaml::from_str::<serde_yaml::Value>(raw)
        .map_err(|e| ConfigError(format!("failed to parse YAML ({source}): {e}")))
        .and_then(|v| {
            serde_json::to_value(v).map_err(|e| ConfigError(format!("invalid YAML ({source}): {e}")))
        })?;
    if !value.is_object() {
        return Err(ConfigError(format!("policy must be a mapping: {source}")));
    }
    Ok(value)
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn object_keys(value: &Value) -> HashSet<String> {
    value
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

fn require_list_of_strings(name: &str, value: &Value) -> Result<Vec<String>, ConfigError> {
    value
        .as_array()
        .ok_or_else(|| ConfigError(format!("'{name}' must be a list")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError(format!("'{name}' must be a list of strings")))
        })
        .collect()
}

fn require_nonneg_u64(name: &str, value: &Value) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .ok_or_else(|| ConfigError(format!("'{name}' must be a non-negative integer")))
}

fn validate_and_build_profile(
    profile_name: &str,
    prof: &Value,
    strict: bool,
) -> Result<PolicyConfig, ConfigError> {
    if !prof.is_object() {
        return Err(ConfigError(format!("profiles.{profile_name} must be a mapping")));
    }

    if strict {
        let unknown: Vec<String> = object_keys(prof)
            .into_iter()
            .filter(|k| !ALLOWED_PROFILE_KEYS.contains(&k.as_str()))
            .collect();
        if !unknown.is_empty() {
            let mut unknown = unknown;
            unknown.sort();
            return Err(ConfigError(format!(
                "unknown keys in profile '{profile_name}': {unknown:?}"
            )));
        }
    }

    for key in REQUIRED_PROFILE_KEYS {
        if prof.get(key).is_none() {
            return Err(ConfigError(format!(
                "missing required key in profile '{profile_name}': {key}"
            )));
        }
    }

    let allow_paths = require_list_of_strings("allow_paths", &prof["allow_paths"])?;
    let deny_globs = require_list_of_strings("deny_globs", &prof["deny_globs"])?;

    let allow_tasks_raw = prof["allow_tasks"]
        .as_object()
        .ok_or_else(|| ConfigError("'allow_tasks' must be a mapping".to_string()))?;
    let mut allow_tasks = BTreeMap::new();
    for (task_name, argv) in allow_tasks_raw {
        let argv = require_list_of_strings(&format!("allow_tasks['{task_name}']"), argv)?;
        allow_tasks.insert(task_name.clone(), argv);
    }

    for key in REQUIRED_NUMERIC_KEYS {
        require_nonneg_u64(key, &prof[*key])?;
    }

    let rr = &prof["risk_rules"];
    if !rr.is_object() {
        return Err(ConfigError(format!(
            "'risk_rules' must be a mapping in profile '{profile_name}'"
        )));
    }
    if strict {
        let unknown_rr: Vec<String> = object_keys(rr)
            .into_iter()
            .filter(|k| !ALLOWED_RISK_RULE_KEYS.contains(&k.as_str()))
            .collect();
        if !unknown_rr.is_empty() {
            let mut unknown_rr = unknown_rr;
            unknown_rr.sort();
            return Err(ConfigError(format!(
                "unknown keys in risk_rules for '{profile_name}': {unknown_rr:?}"
            )));
        }
    }
    for key in ALLOWED_RISK_RULE_KEYS {
        if rr.get(key).is_none() {
            return Err(ConfigError(format!(
                "missing risk_rules key in '{profile_name}': {key}"
            )));
        }
    }
    let risk_rules = RiskRules {
        high_globs: require_list_of_strings("risk_rules.high_globs", &rr["high_globs"])?,
        medium_globs: require_list_of_strings("risk_rules.medium_globs", &rr["medium_globs"])?,
        low_globs: require_list_of_strings("risk_rules.low_globs", &rr["low_globs"])?,
    };

    let max_file_bytes = prof["max_file_bytes"].as_u64().unwrap();
    let max_runtime_seconds = prof["max_runtime_seconds"].as_u64().unwrap();
    let max_output_bytes = prof["max_output_bytes"].as_u64().unwrap();
    let max_runs = prof["max_runs"].as_u64().unwrap() as usize;
    let run_ttl_seconds = prof["run_ttl_seconds"].as_u64().unwrap() as i64;
    let max_bundles = prof["max_bundles"].as_u64().unwrap() as usize;
    let bundle_ttl_seconds = prof["bundle_ttl_seconds"].as_u64().unwrap() as i64;
    let max_audit_logs = prof["max_audit_logs"].as_u64().unwrap() as usize;
    let audit_ttl_seconds = prof["audit_ttl_seconds"].as_u64().unwrap() as i64;

    let policy_hash = canonical_hash(&json!({
        "version": 1,
        "profile": profile_name,
        "policy": {
            "allow_paths": allow_paths,
            "deny_globs": deny_globs,
            "allow_tasks": allow_tasks,
            "max_file_bytes": max_file_bytes,
            "max_runtime_seconds": max_runtime_seconds,
            "max_output_bytes": max_output_bytes,
            "max_runs": max_runs,
            "run_ttl_seconds": run_ttl_seconds,
            "max_bundles": max_bundles,
            "bundle_ttl_seconds": bundle_ttl_seconds,
            "max_audit_logs": max_audit_logs,
            "audit_ttl_seconds": audit_ttl_seconds,
            "risk_rules": {
                "high_globs": risk_rules.high_globs,
                "medium_globs": risk_rules.medium_globs,
                "low_globs": risk_rules.low_globs,
            },
        },
    }));

    Ok(PolicyConfig {
        profile: profile_name.to_string(),
        policy_hash,
        allow_paths,
        deny_globs,
        allow_tasks,
        max_file_bytes,
        max_runtime_seconds,
        max_output_bytes,
        max_runs,
        run_ttl_seconds,
        max_bundles,
        bundle_ttl_seconds,
        max_audit_logs,
        audit_ttl_seconds,
        risk_rules,
    })
}

/// Loads the kernel policy, merges an optional project overlay on top,
/// validates the chosen profile, and returns the computed `PolicyConfig`.
pub fn load_effective_policy(
    profile: &str,
    project_policy_path: Option<&Path>,
    strict: bool,
) -> Result<PolicyConfig, ConfigError> {
    let kernel = parse_yaml_mapping(KERNEL_POLICY_YAML, "<kernel policy>")?;

    let overlay = match project_policy_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError(format!("failed to read policy {}: {e}", path.display())))?;
            parse_yaml_mapping(&raw, &path.display().to_string())?
        }
        None => json!({}),
    };

    let merged = deep_merge(kernel, overlay);

    if strict {
        let unknown_top: Vec<String> = object_keys(&merged)
            .into_iter()
            .filter(|k| !ALLOWED_TOP_KEYS.contains(&k.as_str()))
            .collect();
        if !unknown_top.is_empty() {
            let mut unknown_top = unknown_top;
            unknown_top.sort();
            return Err(ConfigError(format!("unknown top-level policy keys: {unknown_top:?}")));
        }
    }

    let profiles = merged
        .get("profiles")
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError("policy must contain a 'profiles' mapping".to_string()))?;

    let prof = profiles
        .get(profile)
        .ok_or_else(|| ConfigError(format!("profile not found in policy: {profile}")))?;

    validate_and_build_profile(profile, prof, strict)
}
