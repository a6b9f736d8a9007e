//! Multi-strategy parser for LLM completions: try whole-response JSON,
//! then a regex-extracted `{...}` block, then a bare per-trait
//! key-value scan. Each strategy validates every value is in `[0,1]`
//! before accepting it.

use crate::vector::MBTIVector;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?([EISNTFJP])"?\s*[:=]\s*([0-9]*\.?[0-9]+)"#).unwrap()
});

const TRAITS: [&str; 8] = ["E", "I", "S", "N", "T", "F", "J", "P"];

#[derive(Debug, Deserialize)]
struct BatchResult {
    content_id: Option<i64>,
    #[serde(alias = "mbti")]
    mbti_probabilities: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    results: Vec<BatchResult>,
}

/// Parses a single-item completion into a normalized vector. Returns
/// `None` if every strategy fails or yields an out-of-range value.
pub fn parse_single(text: &str) -> Option<MBTIVector> {
    if let Some(v) = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| vector_from_trait_object(&v))
    {
        return Some(v);
    }
    if let Some(block) = JSON_BLOCK.find(text) {
        if let Some(v) = serde_json::from_str::<Value>(block.as_str())
            .ok()
            .and_then(|v| vector_from_trait_object(&v))
        {
            return Some(v);
        }
    }
    vector_from_key_value_scan(text)
}

/// Parses a batch completion, which may be `{"results":[{content_id,
/// mbti_probabilities}, ...]}` or a bare single object (treated as one
/// result with an unknown id). Returns `(content_id, vector)` pairs in
/// response order; entries that fail to parse are simply absent — the
/// caller matches by id and substitutes the neutral vector for misses.
pub fn parse_batch(text: &str) -> Vec<(Option<i64>, MBTIVector)> {
    let candidate = JSON_BLOCK.find(text).map(|m| m.as_str()).unwrap_or(text);

    if let Ok(envelope) = serde_json::from_str::<BatchEnvelope>(candidate) {
        return envelope
            .results
            .into_iter()
            .filter_map(|r| {
                let obj = r.mbti_probabilities?;
                let vector = vector_from_trait_object(&obj)?;
                Some((r.content_id, vector))
            })
            .collect();
    }

    if let Some(vector) = parse_single(text) {
        return vec![(None, vector)];
    }
    Vec::new()
}

fn vector_from_trait_object(value: &Value) -> Option<MBTIVector> {
    let obj = value.as_object()?;
    let mut values = [0.0f64; 8];
    for (slot, trait_key) in values.iter_mut().zip(TRAITS) {
        let raw = obj.get(trait_key).or_else(|| obj.get(&trait_key.to_lowercase()))?;
        let num = raw.as_f64()?;
        if !(0.0..=1.0).contains(&num) {
            return None;
        }
        *slot = num;
    }
    Some(MBTIVector::from_components(values))
}

fn vector_from_key_value_scan(text: &str) -> Option<MBTIVector> {
    let mut found = std::collections::HashMap::new();
    for cap in KEY_VALUE.captures_iter(text) {
        let trait_key = cap[1].to_uppercase();
        let num: f64 = cap[2].parse().ok()?;
        found.entry(trait_key).or_insert(num);
    }
    let mut values = [0.0f64; 8];
    for (slot, trait_key) in values.iter_mut().zip(TRAITS) {
        let num = *found.get(trait_key)?;
        if !(0.0..=1.0).contains(&num) {
            return None;
        }
        *slot = num;
    }
    Some(MBTIVector::from_components(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_json_object() {
        let text = r#"{"E":0.7,"I":0.3,"S":0.6,"N":0.4,"T":0.8,"F":0.2,"J":0.9,"P":0.1}"#;
        let v = parse_single(text).expect("should parse");
        assert!((v.e - 0.7).abs() < 1e-9);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = "Sure, here is the analysis:\n```\n{\"E\":0.7,\"I\":0.3,\"S\":0.6,\"N\":0.4,\"T\":0.8,\"F\":0.2,\"J\":0.9,\"P\":0.1}\n```\nHope this helps.";
        let v = parse_single(text).expect("should parse embedded block");
        assert!((v.j - 0.9).abs() < 1e-9);
    }

    #[test]
    fn parses_bare_key_value_pairs() {
        let text = "E: 0.7, I: 0.3, S: 0.6, N: 0.4, T: 0.8, F: 0.2, J: 0.9, P: 0.1";
        let v = parse_single(text).expect("should parse key-value scan");
        assert!((v.p - 0.1).abs() < 1e-9);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let text = r#"{"E":1.5,"I":0.3,"S":0.6,"N":0.4,"T":0.8,"F":0.2,"J":0.9,"P":0.1}"#;
        assert!(parse_single(text).is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_single("no useful content here").is_none());
    }

    #[test]
    fn parses_batch_results_shape() {
        let text = r#"{"results":[
            {"content_id": 1, "mbti_probabilities": {"E":0.7,"I":0.3,"S":0.6,"N":0.4,"T":0.8,"F":0.2,"J":0.9,"P":0.1}},
            {"content_id": 2, "mbti_probabilities": {"E":0.2,"I":0.8,"S":0.1,"N":0.9,"T":0.3,"F":0.7,"J":0.4,"P":0.6}}
        ]}"#;
        let results = parse_batch(text);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Some(1));
    }
}
