//! The decision pipeline: adjudicates every tool invocation against the
//! active policy, maintains the three bounded stores, and shapes the
//! meta block stamped onto every response.

use crate::hashing::canonical_hash;
use crate::path_safety;
use crate::policy::PolicyConfig;
use crate::response::{Code, Decision as DecisionVerdict, Meta, ResponseContract};
use crate::store::BoundedStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Read,
    Write,
    Execute,
    Network,
}

impl Risk {
    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Read => "read",
            Risk::Write => "write",
            Risk::Execute => "execute",
            Risk::Network => "network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub owner_hash: String,
    pub metadata: Value,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: RunStatus,
    pub tool_sequence: Vec<String>,
    pub risk_distribution: std::collections::BTreeMap<String, u64>,
    pub allowed_count: u64,
    pub blocked_count: u64,
}

#[derive(Debug, Clone)]
pub struct BundleRecord {
    pub bundle_id: String,
    pub diff_text: String,
    pub metadata: Value,
    pub target_files: Vec<String>,
    pub created_at: String,
    pub owner_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub key: String,
    pub config_path: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub audit_id: String,
    pub timestamp: String,
    pub tool: String,
    pub risk: Risk,
    pub decision: DecisionVerdict,
    pub code: Code,
    pub args_sha256: String,
    pub duration_ms: u64,
    pub policy_hash: String,
    pub policy_profile: String,
    pub server_instance_id: String,
    pub run_counter: u64,
    pub violation: Option<Violation>,
    pub run_id: Option<String>,
    pub owner_id_hash: Option<String>,
}

/// The outcome of [`Governor::validate_action`]: what the caller should do
/// next, and (when not allowed) a ready-to-return response.
pub struct Decision {
    pub audit_id: String,
    pub tool: String,
    pub risk: Risk,
    pub decision: DecisionVerdict,
    pub code: Code,
    pub violation: Option<Violation>,
    pub block_response: Option<ResponseContract>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.decision == DecisionVerdict::Allowed
    }
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

const LIFECYCLE_TOOLS: &[&str] = &["start_run", "end_run", "get_run_summary"];

/// The single, per-process policy-enforcement kernel.
pub struct Governor {
    pub policy: PolicyConfig,
    pub root: PathBuf,
    pub server_instance_id: String,
    pub strict: bool,
    run_counter: u64,
    runs: BoundedStore<RunRecord>,
    bundles: BoundedStore<BundleRecord>,
    audit_logs: BoundedStore<AuditEntry>,
}

impl Governor {
    pub fn new(policy: PolicyConfig, root: PathBuf, strict: bool) -> anyhow::Result<Self> {
        let runs = BoundedStore::with_system_clock(policy.max_runs, policy.run_ttl_seconds)?;
        let bundles = BoundedStore::with_system_clock(policy.max_bundles, policy.bundle_ttl_seconds)?;
        let audit_logs =
            BoundedStore::with_system_clock(policy.max_audit_logs, policy.audit_ttl_seconds)?;
        Ok(Self {
            policy,
            root,
            server_instance_id: Uuid::new_v4().to_string(),
            strict,
            run_counter: 0,
            runs,
            bundles,
            audit_logs,
        })
    }

    pub fn bundles_mut(&mut self) -> &mut BoundedStore<BundleRecord> {
        &mut self.bundles
    }

    fn timestamp_now() -> String {
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// Builds a meta block reflecting the Governor's current immutable
    /// config plus the caller-supplied per-call facts.
    pub fn build_meta(
        &self,
        tool: impl Into<String>,
        risk: Risk,
        decision: DecisionVerdict,
        code: Code,
        audit_id: impl Into<String>,
        duration_ms: u64,
        run_id: Option<String>,
        output_truncated: bool,
    ) -> Meta {
        Meta {
            audit_id: audit_id.into(),
            tool: tool.into(),
            risk: risk.as_str().to_string(),
            decision,
            code,
            duration_ms,
            run_id,
            run_counter: self.run_counter,
            policy_hash: self.policy.policy_hash.clone(),
            policy_profile: self.policy.profile.clone(),
            server_instance_id: self.server_instance_id.clone(),
            output_truncated,
            timestamp: Self::timestamp_now(),
        }
    }

    fn path_violation(&self, risk: Risk, args: &Value) -> Option<Violation> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(p) = args.get("path").and_then(Value::as_str) {
            candidates.push(p.to_string());
        }
        if let Some(list) = args.get("paths").and_then(Value::as_array) {
            for v in list {
                if let Some(p) = v.as_str() {
                    candidates.push(p.to_string());
                }
            }
        }
        let config_path = match risk {
            Risk::Read => "profiles.<profile>.allow_paths".to_string(),
            _ => "profiles.<profile>".to_string(),
        };
        for candidate in &candidates {
            let resolved = match path_safety::resolve(&self.root, candidate) {
                Ok(p) => p,
                Err(e) => {
                    return Some(Violation {
                        key: "PATH_SAFETY_ERROR".to_string(),
                        config_path: Some(config_path),
                        details: json!({"path": candidate, "error": e.to_string()}),
                    })
                }
            };
            let rel = resolved
                .strip_prefix(&self.root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            for pattern in &self.policy.deny_globs {
                if globset::Glob::new(pattern)
                    .map(|g| g.compile_matcher().is_match(&rel))
                    .unwrap_or(false)
                {
                    return Some(Violation {
                        key: "PATH_MATCHES_DENY_GLOBS".to_string(),
                        config_path: Some("profiles.<profile>.deny_globs".to_string()),
                        details: json!({"path": rel, "matched_glob": pattern}),
                    });
                }
            }
            if path_safety::validate(&resolved, &self.root, &[], &self.policy.allow_paths).is_err()
            {
                return Some(Violation {
                    key: "PATH_OUTSIDE_ALLOW_PATHS".to_string(),
                    config_path: Some("profiles.<profile>.allow_paths".to_string()),
                    details: json!({"path": rel, "allow_paths": self.policy.allow_paths}),
                });
            }
        }
        None
    }

    /// The per-action decision pipeline (§4.5 of the design notes): run
    /// preconditions, the strict-profile guard, policy checks, then audit.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_action(
        &mut self,
        tool: &str,
        risk: Risk,
        args: &Value,
        run_id: Option<&str>,
        owner_id: Option<&str>,
        skip_audit: bool,
    ) -> Decision {
        self.validate_action_ex(tool, risk, args, run_id, owner_id, skip_audit, false, false)
    }

    /// The full decision pipeline, with two extra knobs only the run
    /// lifecycle tools need: `require_owner_without_run` raises
    /// `OWNER_ID_REQUIRED` even when there's no `run_id` to check
    /// ownership against yet (`start_run`'s own case), and
    /// `exempt_profile_guard` skips the ci-profile "write/execute needs a
    /// run_id" guard — a lifecycle tool is how a caller obtains a run_id
    /// in the first place, so it cannot itself be gated on having one.
    #[allow(clippy::too_many_arguments)]
    fn validate_action_ex(
        &mut self,
        tool: &str,
        risk: Risk,
        args: &Value,
        run_id: Option<&str>,
        owner_id: Option<&str>,
        skip_audit: bool,
        require_owner_without_run: bool,
        exempt_profile_guard: bool,
    ) -> Decision {
        if !skip_audit {
            self.run_counter += 1;
        }

        let audit_id = Uuid::new_v4().to_string();
        let args_sha256 = canonical_hash(&json!({
            "args": args,
            "salt": self.server_instance_id,
        }));

        let mut verdict: Option<(DecisionVerdict, Code, Violation)> = None;
        let owner_hash = owner_id.map(sha256_hex);

        if let Some(rid) = run_id {
            if owner_id.is_none() {
                verdict = Some((
                    DecisionVerdict::Blocked,
                    Code::Blocked,
                    Violation {
                        key: "OWNER_ID_REQUIRED".to_string(),
                        config_path: None,
                        details: json!({"run_id": rid}),
                    },
                ));
            } else {
                match self.runs.get(rid) {
                    None => {
                        verdict = Some((
                            DecisionVerdict::Error,
                            Code::NotFound,
                            Violation {
                                key: "RUN_NOT_FOUND".to_string(),
                                config_path: None,
                                details: json!({"run_id": rid}),
                            },
                        ));
                    }
                    Some(run) if run.status == RunStatus::Ended => {
                        verdict = Some((
                            DecisionVerdict::Error,
                            Code::InvalidInput,
                            Violation {
                                key: "RUN_ALREADY_ENDED".to_string(),
                                config_path: None,
                                details: json!({"run_id": rid}),
                            },
                        ));
                    }
                    Some(run) if Some(&run.owner_hash) != owner_hash.as_ref() => {
                        verdict = Some((
                            DecisionVerdict::Error,
                            Code::NotFound,
                            Violation {
                                key: "RUN_NOT_FOUND".to_string(),
                                config_path: None,
                                details: json!({"run_id": rid}),
                            },
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        if verdict.is_none() && require_owner_without_run && run_id.is_none() && owner_id.is_none()
        {
            verdict = Some((
                DecisionVerdict::Blocked,
                Code::Blocked,
                Violation {
                    key: "OWNER_ID_REQUIRED".to_string(),
                    config_path: None,
                    details: json!({}),
                },
            ));
        }

        if verdict.is_none()
            && !exempt_profile_guard
            && self.policy.profile == "ci"
            && matches!(risk, Risk::Write | Risk::Execute)
            && run_id.is_none()
        {
            verdict = Some((
                DecisionVerdict::Blocked,
                Code::Blocked,
                Violation {
                    key: "RUN_ID_REQUIRED".to_string(),
                    config_path: Some(format!("profiles.{}", self.policy.profile)),
                    details: json!({"profile": self.policy.profile, "risk": risk.as_str()}),
                },
            ));
        }

        if verdict.is_none() {
            match risk {
                Risk::Execute => {
                    let task_name = args.get("task_name").and_then(Value::as_str);
                    let allowed = task_name
                        .map(|name| self.policy.allow_tasks.contains_key(name))
                        .unwrap_or(false);
                    if !allowed {
                        verdict = Some((
                            DecisionVerdict::Blocked,
                            Code::Blocked,
                            Violation {
                                key: "TASK_NOT_ALLOWLISTED".to_string(),
                                config_path: Some(format!(
                                    "profiles.{}.allow_tasks",
                                    self.policy.profile
                                )),
                                details: json!({"task_name": task_name}),
                            },
                        ));
                    }
                }
                Risk::Read | Risk::Write => {
                    if let Some(v) = self.path_violation(risk, args) {
                        verdict = Some((DecisionVerdict::Blocked, Code::Blocked, v));
                    }
                }
                Risk::Network => {}
            }
        }

        let (decision, code, violation) = match verdict {
            Some((d, c, v)) => (d, c, Some(v)),
            None => (DecisionVerdict::Allowed, Code::Success, None),
        };

        let block_response = if decision != DecisionVerdict::Allowed {
            let meta = self.build_meta(
                tool,
                risk,
                decision,
                code,
                audit_id.clone(),
                0,
                run_id.map(str::to_string),
                false,
            );
            let v = violation.as_ref().unwrap();
            let summary = format!("action rejected by policy: {}", v.key);
            let response = if decision == DecisionVerdict::Blocked {
                let data = json!({
                    "policy_violation": {
                        "key": v.key,
                        "config_path": v.config_path,
                        "details": v.details,
                    }
                });
                ResponseContract::blocked(summary, data, meta)
            } else {
                let data = json!({ "key": v.key, "details": v.details });
                ResponseContract::error(code, summary, data, meta)
            };
            let owner_hint = owner_hash.as_deref().map(|h| h[..8].to_string());
            Some(response.with_owner(owner_hash.clone(), owner_hint))
        } else {
            None
        };

        if !skip_audit {
            let entry = AuditEntry {
                audit_id: audit_id.clone(),
                timestamp: Self::timestamp_now(),
                tool: tool.to_string(),
                risk,
                decision,
                code,
                args_sha256,
                duration_ms: 0,
                policy_hash: self.policy.policy_hash.clone(),
                policy_profile: self.policy.profile.clone(),
                server_instance_id: self.server_instance_id.clone(),
                run_counter: self.run_counter,
                violation: violation.clone(),
                run_id: run_id.map(str::to_string),
                owner_id_hash: owner_hash.clone(),
            };
            self.audit_logs.set(audit_id.clone(), entry);

            if let Some(rid) = run_id {
                if !LIFECYCLE_TOOLS.contains(&tool) {
                    if let Some(mut run) = self.runs.get(rid) {
                        if run.status == RunStatus::Active
                            && Some(&run.owner_hash) == owner_hash.as_ref()
                        {
                            run.tool_sequence.push(tool.to_string());
                            *run.risk_distribution.entry(risk.as_str().to_string()).or_insert(0) +=
                                1;
                            match decision {
                                DecisionVerdict::Allowed => run.allowed_count += 1,
                                _ => run.blocked_count += 1,
                            }
                            self.runs.set(rid.to_string(), run);
                        }
                    }
                }
            }
        }

        Decision {
            audit_id,
            tool: tool.to_string(),
            risk,
            decision,
            code,
            violation,
            block_response,
        }
    }

    /// Updates a previously-stored audit entry's `duration_ms` after the
    /// adapter finishes its work. A no-op if the entry already expired.
    pub fn record_duration(&mut self, audit_id: &str, duration_ms: u64) {
        if let Some(mut entry) = self.audit_logs.get(audit_id) {
            entry.duration_ms = duration_ms;
            self.audit_logs.set(audit_id.to_string(), entry);
        }
    }

    /// Ownership-checked lookup used by `explain_policy_decision`. Does not
    /// touch the audit log's liveness beyond the store's own `get` refresh.
    pub fn lookup_audit(&mut self, audit_id: &str, owner_id: Option<&str>) -> Option<AuditEntry> {
        let entry = self.audit_logs.get(audit_id)?;
        if let Some(owner) = owner_id {
            if entry.owner_id_hash.as_deref() != Some(sha256_hex(owner).as_str()) {
                return None;
            }
        }
        Some(entry)
    }

    /// Returns the validation decision plus, on success, the fresh run id
    /// (the only place that id is minted, so callers must capture it here).
    pub fn start_run(&mut self, metadata: Option<Value>, owner_id: Option<&str>) -> (Decision, Option<String>) {
        let decision = self.validate_action_ex(
            "start_run",
            Risk::Write,
            &json!({}),
            None,
            owner_id,
            false,
            true,
            true,
        );
        if !decision.is_allowed() {
            return (decision, None);
        }
        let owner = owner_id.expect("validate_action would have blocked a missing owner_id");
        let run_id = Uuid::new_v4().to_string();
        let run = RunRecord {
            run_id: run_id.clone(),
            owner_hash: sha256_hex(owner),
            metadata: metadata.unwrap_or(json!({})),
            start_time: Utc::now().timestamp(),
            end_time: None,
            status: RunStatus::Active,
            tool_sequence: Vec::new(),
            risk_distribution: std::collections::BTreeMap::new(),
            allowed_count: 0,
            blocked_count: 0,
        };
        self.runs.set(run_id.clone(), run);
        (decision, Some(run_id))
    }

    pub fn end_run(&mut self, run_id: &str, owner_id: Option<&str>) -> Decision {
        let mut decision = self.validate_action_ex(
            "end_run",
            Risk::Write,
            &json!({}),
            Some(run_id),
            owner_id,
            false,
            false,
            true,
        );
        if !decision.is_allowed() {
            return decision;
        }
        if let Some(mut run) = self.runs.get(run_id) {
            run.status = RunStatus::Ended;
            run.end_time = Some(Utc::now().timestamp());
            self.runs.set(run_id.to_string(), run);
        } else {
            decision.decision = DecisionVerdict::Error;
            decision.code = Code::NotFound;
            decision.violation = Some(Violation {
                key: "RUN_NOT_FOUND".to_string(),
                config_path: None,
                details: json!({"run_id": run_id}),
            });
        }
        decision
    }

    pub fn get_run(&mut self, run_id: &str, owner_id: Option<&str>) -> Option<RunRecord> {
        let run = self.runs.get(run_id)?;
        if let Some(owner) = owner_id {
            if run.owner_hash != sha256_hex(owner) {
                return None;
            }
        }
        Some(run)
    }

    /// Ownership-checked validation for the read-only run-summary lookup.
    /// On an allowed decision the caller still fetches the record itself
    /// via [`Governor::get_run`].
    pub fn validate_get_run_summary(&mut self, run_id: &str, owner_id: Option<&str>) -> Decision {
        self.validate_action_ex(
            "get_run_summary",
            Risk::Read,
            &json!({}),
            Some(run_id),
            owner_id,
            false,
            false,
            true,
        )
    }

    /// The three bounded stores' `(max_size, ttl_seconds)`, for
    /// `self_check`'s internal health probe.
    pub fn store_bounds(&self) -> [(&'static str, usize, i64); 3] {
        [
            ("runs", self.runs.max_size(), self.runs.ttl_seconds()),
            ("bundles", self.bundles.max_size(), self.bundles.ttl_seconds()),
            ("audit_logs", self.audit_logs.max_size(), self.audit_logs.ttl_seconds()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::load_effective_policy;

    fn governor(profile: &str, root: &std::path::Path) -> Governor {
        let policy = load_effective_policy(profile, None, false).unwrap();
        Governor::new(policy, root.to_path_buf(), false).unwrap()
    }

    #[test]
    fn read_outside_allow_paths_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        gov.policy.allow_paths = vec!["src".to_string()];
        let decision = gov.validate_action(
            "read_file",
            Risk::Read,
            &json!({"path": "docs/readme.md"}),
            None,
            None,
            false,
        );
        assert_eq!(decision.decision, DecisionVerdict::Blocked);
        assert_eq!(decision.violation.unwrap().key, "PATH_OUTSIDE_ALLOW_PATHS");
    }

    #[test]
    fn execute_requires_allowlisted_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let decision = gov.validate_action(
            "run_task",
            Risk::Execute,
            &json!({"task_name": "rm"}),
            None,
            None,
            false,
        );
        assert_eq!(decision.decision, DecisionVerdict::Blocked);
        assert_eq!(decision.violation.unwrap().key, "TASK_NOT_ALLOWLISTED");
    }

    #[test]
    fn ci_profile_requires_run_id_for_write_actions() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("ci", dir.path());
        let decision = gov.validate_action(
            "apply_patch",
            Risk::Write,
            &json!({"path": "src/lib.rs"}),
            None,
            None,
            false,
        );
        assert_eq!(decision.decision, DecisionVerdict::Blocked);
        assert_eq!(decision.violation.unwrap().key, "RUN_ID_REQUIRED");
    }

    #[test]
    fn ci_profile_does_not_block_start_run_for_lacking_a_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("ci", dir.path());
        let (decision, run_id) = gov.start_run(None, Some("owner-a"));
        assert!(decision.is_allowed());
        assert!(run_id.is_some());
    }

    #[test]
    fn start_run_without_owner_id_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let (decision, run_id) = gov.start_run(None, None);
        assert_eq!(decision.decision, DecisionVerdict::Blocked);
        assert_eq!(decision.violation.unwrap().key, "OWNER_ID_REQUIRED");
        assert!(run_id.is_none());
    }

    #[test]
    fn lifecycle_tools_do_not_skew_risk_distribution_or_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let (_, run_id) = gov.start_run(None, Some("owner-a"));
        let run_id = run_id.unwrap();
        gov.validate_get_run_summary(&run_id, Some("owner-a"));
        let run = gov.get_run(&run_id, Some("owner-a")).unwrap();
        assert!(run.risk_distribution.is_empty());
        assert_eq!(run.allowed_count, 0);
        assert_eq!(run.blocked_count, 0);
    }

    #[test]
    fn owner_mismatch_and_absent_run_are_indistinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let (_, run_id) = gov.start_run(None, Some("owner-a"));
        let run_id = run_id.unwrap();

        let absent = gov.validate_action(
            "get_run_summary",
            Risk::Read,
            &json!({}),
            Some("no-such-run"),
            Some("owner-a"),
            true,
        );
        let mismatched = gov.validate_action(
            "get_run_summary",
            Risk::Read,
            &json!({}),
            Some(&run_id),
            Some("owner-b"),
            true,
        );
        assert_eq!(absent.code, Code::NotFound);
        assert_eq!(mismatched.code, Code::NotFound);
        assert_eq!(
            absent.violation.unwrap().key,
            mismatched.violation.unwrap().key
        );
    }

    #[test]
    fn lifecycle_tools_are_not_counted_in_their_own_run_tool_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let (_, run_id) = gov.start_run(None, Some("owner-a"));
        let run_id = run_id.unwrap();
        let run = gov.get_run(&run_id, Some("owner-a")).unwrap();
        assert!(run.tool_sequence.is_empty());
    }

    #[test]
    fn blocked_response_owner_hint_is_a_hash_prefix_not_the_raw_owner_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("ci", dir.path());
        let decision = gov.validate_action(
            "apply_patch",
            Risk::Write,
            &json!({"path": "src/lib.rs"}),
            None,
            Some("owner-secret"),
            false,
        );
        let resp = decision.block_response.unwrap();
        let hint = resp.owner_hint.unwrap();
        assert_ne!(hint, "owner-secret");
        let hash = resp.owner_id_hash.unwrap();
        assert_eq!(hint, hash[..8]);
    }

    #[test]
    fn run_counter_does_not_advance_when_skip_audit_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut gov = governor("dev", dir.path());
        let before = gov.run_counter;
        gov.validate_action("explain_policy_decision", Risk::Read, &json!({}), None, None, true);
        assert_eq!(gov.run_counter, before);
    }
}
