//! Layered YAML configuration, deep-merged across files and hashed for
//! reproducibility, plus the typed `EngineConfig` struct the rest of the
//! workspace reads from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Materialize the typed, flat `EngineConfig` from the merged JSON,
    /// falling back to `EngineConfig::default()` for any absent leaf.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut cfg = EngineConfig::default();
        let v = &self.config_json;

        if let Some(n) = v.pointer("/max_global_concurrent_calls").and_then(Value::as_i64) {
            cfg.max_global_concurrent_calls = n;
        }
        if let Some(n) = v
            .pointer("/max_per_tenant_concurrent_calls")
            .and_then(Value::as_i64)
        {
            cfg.max_per_tenant_concurrent_calls = n;
        }
        if let Some(n) = v.pointer("/heartbeat_interval_ms").and_then(Value::as_i64) {
            cfg.heartbeat_interval_ms = n;
        }
        if let Some(n) = v.pointer("/orphan_threshold_ms").and_then(Value::as_i64) {
            cfg.orphan_threshold_ms = n;
        }
        if let Some(n) = v.pointer("/warmup_max_attempts").and_then(Value::as_i64) {
            cfg.warmup_max_attempts = n as u32;
        }
        if let Some(n) = v.pointer("/warmup_backoff_ms").and_then(Value::as_i64) {
            cfg.warmup_backoff_ms = n;
        }
        if let Some(n) = v.pointer("/inter_call_pacing_ms").and_then(Value::as_i64) {
            cfg.inter_call_pacing_ms = n;
        }
        if let Some(n) = v.pointer("/backpressure_sleep_ms").and_then(Value::as_i64) {
            cfg.backpressure_sleep_ms = n;
        }
        if let Some(n) = v.pointer("/credit_per_second").and_then(Value::as_i64) {
            cfg.credit_per_second = n;
        }
        if let Some(n) = v.pointer("/provider_retry_max").and_then(Value::as_i64) {
            cfg.provider_retry_max = n as u32;
        }
        if let Some(obj) = v.pointer("/call_state_timeouts_ms").and_then(Value::as_object) {
            for (k, val) in obj {
                if let Some(ms) = val.as_i64() {
                    cfg.call_state_timeouts_ms.insert(k.clone(), ms);
                }
            }
        }
        if let Some(obj) = v
            .pointer("/provider_credential_defaults")
            .and_then(Value::as_object)
        {
            for (provider, val) in obj {
                let creds: ProviderCredentialDefault =
                    serde_json::from_value(val.clone()).with_context(|| {
                        format!("invalid provider_credential_defaults.{provider}")
                    })?;
                cfg.provider_credential_defaults
                    .insert(provider.clone(), creds);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// EngineConfig (§6.4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentialDefault {
    pub account_sid: String,
    pub auth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_global_concurrent_calls: i64,
    pub max_per_tenant_concurrent_calls: i64,
    pub heartbeat_interval_ms: i64,
    pub orphan_threshold_ms: i64,
    pub warmup_max_attempts: u32,
    pub warmup_backoff_ms: i64,
    pub inter_call_pacing_ms: i64,
    pub backpressure_sleep_ms: i64,
    pub call_state_timeouts_ms: HashMap<String, i64>,
    pub credit_per_second: i64,
    pub provider_retry_max: u32,
    pub provider_credential_defaults: HashMap<String, ProviderCredentialDefault>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut call_state_timeouts_ms = HashMap::new();
        call_state_timeouts_ms.insert("initiating".to_string(), 30_000);
        call_state_timeouts_ms.insert("warming".to_string(), 30_000);
        call_state_timeouts_ms.insert("ringing".to_string(), 60_000);
        call_state_timeouts_ms.insert("ongoing".to_string(), 3_600_000);

        Self {
            max_global_concurrent_calls: 100,
            max_per_tenant_concurrent_calls: 10,
            heartbeat_interval_ms: 5_000,
            orphan_threshold_ms: 30_000,
            warmup_max_attempts: 3,
            warmup_backoff_ms: 500,
            inter_call_pacing_ms: 0,
            backpressure_sleep_ms: 1_000,
            call_state_timeouts_ms,
            credit_per_second: 1,
            provider_retry_max: 2,
            provider_credential_defaults: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// `OrphanThresholdMs` must be strictly greater than twice `HeartbeatIntervalMs` (§6.4).
    pub fn validate(&self) -> Result<()> {
        if self.orphan_threshold_ms <= 2 * self.heartbeat_interval_ms {
            anyhow::bail!(
                "orphan_threshold_ms ({}) must be > 2 * heartbeat_interval_ms ({})",
                self.orphan_threshold_ms,
                self.heartbeat_interval_ms
            );
        }
        if self.max_global_concurrent_calls <= 0 || self.max_per_tenant_concurrent_calls <= 0 {
            anyhow::bail!("concurrency ceilings must be positive");
        }
        Ok(())
    }

    pub fn timeout_ms_for_state(&self, state: &str) -> i64 {
        self.call_state_timeouts_ms
            .get(state)
            .copied()
            .unwrap_or(60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn deep_merge_overrides_later_files() {
        let base = write_temp_yaml("max_global_concurrent_calls: 50\nheartbeat_interval_ms: 1000\n");
        let overlay = write_temp_yaml("max_global_concurrent_calls: 200\n");

        let loaded = load_layered_yaml(&[
            base.path().to_str().unwrap(),
            overlay.path().to_str().unwrap(),
        ])
        .unwrap();

        let cfg = loaded.engine_config().unwrap();
        assert_eq!(cfg.max_global_concurrent_calls, 200);
        assert_eq!(cfg.heartbeat_interval_ms, 1000);
    }

    #[test]
    fn hash_is_stable_regardless_of_key_order() {
        let a = write_temp_yaml("b: 2\na: 1\n");
        let b = write_temp_yaml("a: 1\nb: 2\n");

        let loaded_a = load_layered_yaml(&[a.path().to_str().unwrap()]).unwrap();
        let loaded_b = load_layered_yaml(&[b.path().to_str().unwrap()]).unwrap();

        assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
    }

    #[test]
    fn rejects_orphan_threshold_not_exceeding_double_heartbeat() {
        let mut cfg = EngineConfig::default();
        cfg.heartbeat_interval_ms = 20_000;
        cfg.orphan_threshold_ms = 30_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
