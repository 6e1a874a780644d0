//! Layered config loading + canonical hashing, plus the recognized runtime
//! knobs (§6): deep-merge a stack of YAML files in order, canonicalize to
//! sorted-key JSON, and hash the result so callers can tell whether the
//! effective config changed between two loads.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value = serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
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

/// Recognized environment knobs (§6). `from_env` never fails on a missing
/// var, only on a present-but-unparsable one.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the env var holding the base64 AES-256 key — indirection so
    /// the key itself never lands in a config file or process listing.
    pub encryption_key_env_var: String,
    pub sor_timeout: Duration,
    pub sor_max_retries: u32,
    pub sor_page_size: usize,
    pub push_concurrency: usize,
    pub pull_progress_interval: Duration,
    pub audit_async: bool,
    pub audit_export_max_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption_key_env_var: "GRC_ENCRYPTION_KEY".to_string(),
            sor_timeout: Duration::from_secs(30),
            sor_max_retries: 3,
            sor_page_size: 100,
            push_concurrency: 5,
            pull_progress_interval: Duration::from_secs(2),
            audit_async: true,
            audit_export_max_rows: 10_000,
        }
    }
}

impl Settings {
    /// Overlay environment variables onto the defaults. Unset vars keep
    /// their default; a set-but-malformed var is a hard error (fail fast on
    /// a broken deployment rather than silently falling back).
    pub fn from_env() -> Result<Self> {
        let mut s = Self::default();

        if let Ok(v) = std::env::var("GRC_ENCRYPTION_KEY_ENV_VAR") {
            s.encryption_key_env_var = v;
        }
        if let Ok(v) = std::env::var("GRC_SOR_TIMEOUT_SECS") {
            s.sor_timeout = Duration::from_secs(v.parse().context("GRC_SOR_TIMEOUT_SECS must be an integer")?);
        }
        if let Ok(v) = std::env::var("GRC_SOR_MAX_RETRIES") {
            s.sor_max_retries = v.parse().context("GRC_SOR_MAX_RETRIES must be an integer")?;
        }
        if let Ok(v) = std::env::var("GRC_SOR_PAGE_SIZE") {
            s.sor_page_size = v.parse().context("GRC_SOR_PAGE_SIZE must be an integer")?;
        }
        if let Ok(v) = std::env::var("GRC_PUSH_CONCURRENCY") {
            s.push_concurrency = v.parse().context("GRC_PUSH_CONCURRENCY must be an integer")?;
        }
        if let Ok(v) = std::env::var("GRC_PULL_PROGRESS_INTERVAL_SECS") {
            s.pull_progress_interval = Duration::from_secs(v.parse().context("GRC_PULL_PROGRESS_INTERVAL_SECS must be an integer")?);
        }
        if let Ok(v) = std::env::var("GRC_AUDIT_ASYNC") {
            s.audit_async = v.parse().context("GRC_AUDIT_ASYNC must be true/false")?;
        }
        if let Ok(v) = std::env::var("GRC_AUDIT_EXPORT_MAX_ROWS") {
            s.audit_export_max_rows = v.parse().context("GRC_AUDIT_EXPORT_MAX_ROWS must be an integer")?;
        }

        Ok(s)
    }

    /// Resolve the actual encryption key material from the env var named by
    /// `encryption_key_env_var`.
    pub fn encryption_key_base64(&self) -> Result<String> {
        std::env::var(&self.encryption_key_env_var).with_context(|| format!("encryption key env var '{}' is not set", self.encryption_key_env_var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let s = Settings::default();
        assert_eq!(s.sor_max_retries, 3);
        assert_eq!(s.sor_page_size, 100);
        assert_eq!(s.push_concurrency, 5);
        assert_eq!(s.audit_export_max_rows, 10_000);
        assert!(s.audit_async);
    }

    #[test]
    fn deep_merge_overrides_scalars_and_merges_objects() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = serde_json::json!({"a": {"y": 20, "z": 30}});
        deep_merge(&mut base, overlay);
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3}));
    }

    #[test]
    fn canonicalize_sorts_keys_recursively() {
        let v = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let out = canonicalize_json(&v);
        assert_eq!(out, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
