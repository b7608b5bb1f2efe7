//! Deterministic change-bundle identity: parse target paths out of a
//! unified diff, normalize it, and derive a stable id any caller can
//! recompute bit-for-bit from the same inputs.

use crate::governor::{sha256_hex, BundleRecord, Governor};
use crate::hashing::canonical_hash;
use crate::path_safety;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};

/// Converts CRLF/lone-CR to LF, right-strips trailing whitespace from
/// every line, and drops trailing blank lines.
pub fn normalize_diff_text(diff_text: &str) -> String {
    let unified = diff_text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = unified
        .split('\n')
        .map(|line| line.trim_end().to_string())
        .collect();
    while lines.last().map(String::is_empty).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

/// Extracts target file paths from unified-diff `+++`/`---` header lines,
/// dropping `/dev/null` (used for file creation/deletion).
pub fn extract_target_files(diff_text: &str) -> Vec<String> {
    let header = Regex::new(r"^(?:\+\+\+|---) (?:[ab]/)?(.+)$").unwrap();
    let mut seen = std::collections::BTreeSet::new();
    for line in diff_text.lines() {
        if let Some(caps) = header.captures(line) {
            let path = caps[1].trim();
            if path != "/dev/null" {
                seen.insert(path.to_string());
            }
        }
    }
    seen.into_iter().collect()
}

pub fn bundle_id(contract_version: &str, policy_hash: &str, target_files: &[String], diff_text: &str) -> String {
    let mut sorted: Vec<String> = target_files.to_vec();
    sorted.sort();
    canonical_hash(&json!({
        "contract_version": contract_version,
        "policy_hash": policy_hash,
        "target_files": sorted,
        "diff": normalize_diff_text(diff_text),
    }))
}

#[derive(Debug)]
pub enum CreateBundleError {
    NoTargets,
    PathSafety(String),
}

impl Governor {
    /// Parses target paths from the diff, validates each, and computes a
    /// deterministic id. Re-submitting the same bundle is idempotent: the
    /// existing record is returned unchanged (its recency is refreshed by
    /// the store's own `get`/`set` semantics).
    pub fn create_change_bundle(
        &mut self,
        diff_text: &str,
        metadata: Option<Value>,
        owner_id: Option<&str>,
    ) -> Result<BundleRecord, CreateBundleError> {
        let target_files = extract_target_files(diff_text);
        if target_files.is_empty() {
            return Err(CreateBundleError::NoTargets);
        }
        for target in &target_files {
            path_safety::resolve_and_validate(
                &self.root,
                target,
                &self.policy.deny_globs,
                &self.policy.allow_paths,
            )
            .map_err(|e| CreateBundleError::PathSafety(e.to_string()))?;
        }

        let id = bundle_id(
            crate::response::CONTRACT_VERSION,
            &self.policy.policy_hash,
            &target_files,
            diff_text,
        );

        if let Some(existing) = self.bundles_mut().get(&id) {
            return Ok(existing);
        }

        let record = BundleRecord {
            bundle_id: id.clone(),
            diff_text: normalize_diff_text(diff_text),
            metadata: metadata.unwrap_or(json!({})),
            target_files,
            created_at: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            owner_hash: owner_id.map(sha256_hex),
        };
        self.bundles_mut().set(id, record.clone());
        Ok(record)
    }

    pub fn get_bundle(&mut self, bundle_id: &str, owner_id: Option<&str>) -> Option<BundleRecord> {
        let record = self.bundles_mut().get(bundle_id)?;
        if let Some(owner) = owner_id {
            if record.owner_hash.as_deref() != Some(sha256_hex(owner).as_str()) {
                return None;
            }
        }
        Some(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleRisk {
    High,
    Medium,
    Low,
}

/// Classifies a bundle's risk by evaluating its target files against the
/// policy's glob tiers, short-circuiting to the highest tier that matches
/// any file.
pub fn classify_risk(target_files: &[String], risk_rules: &crate::policy::RiskRules) -> BundleRisk {
    let matches_any = |globs: &[String]| {
        target_files.iter().any(|file| {
            globs.iter().any(|pattern| {
                globset::Glob::new(pattern)
                    .map(|g| g.compile_matcher().is_match(file))
                    .unwrap_or(false)
            })
        })
    };
    if matches_any(&risk_rules.high_globs) {
        BundleRisk::High
    } else if matches_any(&risk_rules.medium_globs) {
        BundleRisk::Medium
    } else {
        BundleRisk::Low
    }
}

/// A synthetic commit message: "Update N files: a, b and others".
pub fn synthetic_commit_message(target_files: &[String]) -> String {
    match target_files.len() {
        0 => "Update 0 files".to_string(),
        1 => format!("Update 1 file: {}", target_files[0]),
        2 => format!("Update 2 files: {} and {}", target_files[0], target_files[1]),
        n => format!(
            "Update {n} files: {}, {} and others",
            target_files[0], target_files[1]
        ),
    }
}

pub fn rollback_hint(target_files: &[String]) -> String {
    format!("git checkout -- {}", target_files.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-old\n+new\n";

    #[test]
    fn extracts_target_files_and_drops_dev_null() {
        let diff = "--- /dev/null\n+++ b/new_file.rs\n@@ -0,0 +1 @@\n+hello\n";
        assert_eq!(extract_target_files(diff), vec!["new_file.rs".to_string()]);
    }

    #[test]
    fn normalizes_crlf_and_trailing_blank_lines() {
        let diff = "line one\r\nline two  \r\n\r\n\r\n";
        assert_eq!(normalize_diff_text(diff), "line one\nline two");
    }

    #[test]
    fn bundle_id_is_deterministic_for_identical_inputs() {
        let targets = extract_target_files(SAMPLE_DIFF);
        let a = bundle_id("1.1", "hash", &targets, SAMPLE_DIFF);
        let b = bundle_id("1.1", "hash", &targets, SAMPLE_DIFF);
        assert_eq!(a, b);
    }

    #[test]
    fn bundle_id_changes_when_policy_hash_changes() {
        let targets = extract_target_files(SAMPLE_DIFF);
        let a = bundle_id("1.1", "hash-a", &targets, SAMPLE_DIFF);
        let b = bundle_id("1.1", "hash-b", &targets, SAMPLE_DIFF);
        assert_ne!(a, b);
    }

    #[test]
    fn classify_risk_short_circuits_to_highest_tier() {
        let rules = crate::policy::RiskRules {
            high_globs: vec!["*.yaml".to_string()],
            medium_globs: vec!["*.rs".to_string()],
            low_globs: vec!["*".to_string()],
        };
        assert_eq!(
            classify_risk(&["a.yaml".to_string(), "b.rs".to_string()], &rules),
            BundleRisk::High
        );
        assert_eq!(classify_risk(&["b.rs".to_string()], &rules), BundleRisk::Medium);
        assert_eq!(classify_risk(&["c.txt".to_string()], &rules), BundleRisk::Low);
    }

    #[test]
    fn synthetic_commit_message_formats_by_count() {
        assert_eq!(synthetic_commit_message(&["a".to_string()]), "Update 1 file: a");
        assert_eq!(
            synthetic_commit_message(&["a".to_string(), "b".to_string(), "c".to_string()]),
            "Update 3 files: a, b and others"
        );
    }
}
