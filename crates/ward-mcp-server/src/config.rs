//! Transport-level configuration: ambient, process-local, never hashed or
//! audited. Governs the stdio loop, not policy decisions.

use std::env;

#[derive(Clone, Debug)]
pub struct ServerTransportConfig {
    pub call_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub max_field_bytes: usize,
    pub log_level: String,
}

impl Default for ServerTransportConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 15_000,
            max_message_bytes: 1_000_000,
            max_field_bytes: 64_000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerTransportConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("WARD_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.call_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("WARD_MAX_MSG_BYTES") {
            if let Ok(n) = v.parse() {
                cfg.max_message_bytes = n;
            }
        }
        if let Ok(v) = env::var("WARD_MAX_FIELD_BYTES") {
            if let Ok(n) = v.parse() {
                cfg.max_field_bytes = n;
            }
        }
        if let Ok(v) = env::var("WARD_LOG") {
            cfg.log_level = v;
        }
        cfg
    }
}
