//! Merges per-call sampling overrides into a model's baseline parameters.
//!
//! `null` overrides are ignored rather than clearing the baseline value —
//! a caller that wants the default simply omits the key.

use relay_domain::config::ModelParams;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ResolvedSampling {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl Default for ResolvedSampling {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.0,
            max_tokens: 512,
            stop: Vec::new(),
        }
    }
}

pub fn merge_sampling(
    baseline: &ModelParams,
    overrides: &serde_json::Map<String, Value>,
) -> ResolvedSampling {
    let mut resolved = ResolvedSampling::default();

    if let Some(t) = baseline.temperature {
        resolved.temperature = t;
    }
    if let Some(k) = baseline.top_k {
        resolved.top_k = k;
    }
    if let Some(p) = baseline.top_p {
        resolved.top_p = p;
    }
    if let Some(p) = baseline.min_p {
        resolved.min_p = p;
    }
    if let Some(m) = baseline.max_tokens {
        resolved.max_tokens = m;
    }
    if !baseline.stop.is_empty() {
        resolved.stop = baseline.stop.clone();
    }

    apply_override(overrides, "temperature", |v| v.as_f64(), |r, v| {
        r.temperature = v as f32
    }, &mut resolved);
    apply_override(overrides, "top_k", |v| v.as_i64(), |r, v| {
        r.top_k = v as i32
    }, &mut resolved);
    apply_override(overrides, "top_p", |v| v.as_f64(), |r, v| r.top_p = v as f32, &mut resolved);
    apply_override(overrides, "min_p", |v| v.as_f64(), |r, v| r.min_p = v as f32, &mut resolved);
    apply_override(
        overrides,
        "max_tokens",
        |v| v.as_u64(),
        |r, v| r.max_tokens = v as u32,
        &mut resolved,
    );

    if let Some(Value::Array(items)) = overrides.get("stop") {
        if !matches!(overrides.get("stop"), Some(Value::Null)) {
            resolved.stop = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
    }

    resolved
}

fn apply_override<T>(
    overrides: &serde_json::Map<String, Value>,
    key: &str,
    extract: impl Fn(&Value) -> Option<T>,
    apply: impl Fn(&mut ResolvedSampling, T),
    resolved: &mut ResolvedSampling,
) {
    match overrides.get(key) {
        None | Some(Value::Null) => {}
        Some(v) => {
            if let Some(extracted) = extract(v) {
                apply(resolved, extracted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_override_is_ignored() {
        let baseline = ModelParams {
            temperature: Some(0.3),
            ..Default::default()
        };
        let mut overrides = serde_json::Map::new();
        overrides.insert("temperature".into(), Value::Null);
        let resolved = merge_sampling(&baseline, &overrides);
        assert_eq!(resolved.temperature, 0.3);
    }

    #[test]
    fn override_replaces_baseline() {
        let baseline = ModelParams::default();
        let mut overrides = serde_json::Map::new();
        overrides.insert("temperature".into(), serde_json::json!(0.0));
        let resolved = merge_sampling(&baseline, &overrides);
        assert_eq!(resolved.temperature, 0.0);
    }

    #[test]
    fn absent_key_falls_back_to_default() {
        let resolved = merge_sampling(&ModelParams::default(), &serde_json::Map::new());
        assert_eq!(resolved.max_tokens, 512);
    }
}
