//! The canonical response envelope: a closed-set `meta` block and a
//! `status`/`code`/`decision` taxonomy shared by every tool adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONTRACT_VERSION: &str = "1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Blocked,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Blocked,
    Error,
}

/// The code taxonomy. `Code` MUST agree with `Decision`: `Allowed ⇒
/// Success`, `Blocked ⇒ Blocked`, `Error ⇒` one of the remaining variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Success,
    InvalidInput,
    NotFound,
    Blocked,
    ToolFailed,
    Timeout,
}

impl Code {
    pub fn status(self) -> Status {
        match self {
            Code::Success => Status::Ok,
            Code::Blocked => Status::Blocked,
            _ => Status::Error,
        }
    }
}

/// The closed 13-key meta block. Every field is always present; `run_id`
/// is `null` rather than omitted when it doesn't apply, so the key-set
/// invariant is a plain set-equality rather than a conditional one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub audit_id: String,
    pub tool: String,
    pub risk: String,
    pub decision: Decision,
    pub code: Code,
    pub duration_ms: u64,
    pub run_id: Option<String>,
    pub run_counter: u64,
    pub policy_hash: String,
    pub policy_profile: String,
    pub server_instance_id: String,
    pub output_truncated: bool,
    pub timestamp: String,
}

/// The full response envelope returned by every tool adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseContract {
    pub contract_version: String,
    pub status: Status,
    pub code: Code,
    pub summary: String,
    pub data: Value,
    pub warnings: Vec<String>,
    pub next_suggested_actions: Vec<String>,
    pub meta: Meta,
    /// Ownership token fields. Kept outside the closed `meta` set: the
    /// canonical key-set is treated as literal and exhaustive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_hint: Option<String>,
}

impl ResponseContract {
    pub fn new(
        code: Code,
        summary: impl Into<String>,
        data: Value,
        mut meta: Meta,
    ) -> Self {
        // meta.code is always forced to agree with the top-level code.
        meta.code = code;
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            status: code.status(),
            code,
            summary: summary.into(),
            data,
            warnings: Vec::new(),
            next_suggested_actions: Vec::new(),
            meta,
            owner_id_hash: None,
            owner_hint: None,
        }
    }

    pub fn success(summary: impl Into<String>, data: Value, meta: Meta) -> Self {
        Self::new(Code::Success, summary, data, meta)
    }

    pub fn blocked(summary: impl Into<String>, data: Value, meta: Meta) -> Self {
        Self::new(Code::Blocked, summary, data, meta)
    }

    pub fn error(code: Code, summary: impl Into<String>, data: Value, meta: Meta) -> Self {
        debug_assert_ne!(code, Code::Success);
        debug_assert_ne!(code, Code::Blocked);
        Self::new(code, summary, data, meta)
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_next_suggested_actions(mut self, actions: Vec<String>) -> Self {
        self.next_suggested_actions = actions;
        self
    }

    pub fn with_owner(mut self, owner_id_hash: Option<String>, owner_hint: Option<String>) -> Self {
        self.owner_id_hash = owner_id_hash;
        self.owner_hint = owner_hint;
        self
    }

    /// The 13 canonical meta keys, for the set-equality check tools like
    /// `self_check` run against a freshly serialized meta block.
    pub const CANONICAL_META_KEYS: &'static [&'static str] = &[
        "audit_id",
        "tool",
        "risk",
        "decision",
        "code",
        "duration_ms",
        "run_id",
        "run_counter",
        "policy_hash",
        "policy_profile",
        "server_instance_id",
        "output_truncated",
        "timestamp",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_meta() -> Meta {
        Meta {
            audit_id: "a1".to_string(),
            tool: "read_file".to_string(),
            risk: "low".to_string(),
            decision: Decision::Allowed,
            code: Code::Success,
            duration_ms: 1,
            run_id: None,
            run_counter: 0,
            policy_hash: "deadbeef".to_string(),
            policy_profile: "dev".to_string(),
            server_instance_id: "s1".to_string(),
            output_truncated: false,
            timestamp: "2026-07-28T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn meta_code_is_forced_to_match_top_level_code() {
        let mut meta = sample_meta();
        meta.code = Code::Blocked;
        let resp = ResponseContract::success("ok", json!({}), meta);
        assert_eq!(resp.meta.code, Code::Success);
        assert_eq!(resp.status, Status::Ok);
    }

    #[test]
    fn serialized_meta_has_exactly_the_canonical_keys() {
        let resp = ResponseContract::success("ok", json!({}), sample_meta());
        let value = serde_json::to_value(&resp.meta).unwrap();
        let keys: std::collections::HashSet<&str> =
            value.as_object().unwrap().keys().map(String::as_str).collect();
        let expected: std::collections::HashSet<&str> =
            ResponseContract::CANONICAL_META_KEYS.iter().copied().collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn run_id_serializes_as_null_rather_than_being_omitted() {
        let resp = ResponseContract::success("ok", json!({}), sample_meta());
        let value = serde_json::to_value(&resp.meta).unwrap();
        assert!(value.as_object().unwrap().contains_key("run_id"));
        assert!(value["run_id"].is_null());
    }

    #[test]
    fn owner_fields_are_absent_from_meta_and_present_at_top_level_when_set() {
        let resp = ResponseContract::success("ok", json!({}), sample_meta())
            .with_owner(Some("hash".to_string()), Some("hint".to_string()));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(!value["meta"].as_object().unwrap().contains_key("owner_id_hash"));
        assert_eq!(value["owner_id_hash"], "hash");
        assert_eq!(value["owner_hint"], "hint");
    }

    #[test]
    fn blocked_helper_sets_status_and_code_consistently() {
        let resp = ResponseContract::blocked("nope", json!({}), sample_meta());
        assert_eq!(resp.status, Status::Blocked);
        assert_eq!(resp.code, Code::Blocked);
        assert_eq!(resp.meta.code, Code::Blocked);
    }
}
