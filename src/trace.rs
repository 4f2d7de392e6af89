//! Trace reconciliation.
//!
//! `GET /trace/{id}` has shipped in two incompatible shapes. Both carry
//! `trace_id` and `query`; they differ in how candidates are scored and how
//! the final decision is reported:
//!
//! ```text
//! fusion shape                          chosen shape
//! ─────────────────────────────         ─────────────────────────────
//! candidates[].raw_score                candidates[].score
//! fusion: { chosen_doc_id,              chosen: { url, score,
//!           confidence, rationale }               explanations[] }
//! ```
//!
//! [`reconcile_trace`] maps either one into the canonical [`Trace`]. The
//! decision block is resolved by field presence: `fusion` wins when both
//! are present. Optional blocks that fail to map are dropped rather than
//! failing the whole trace.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::transport::{encode_segment, Transport};
use crate::view;

/// Canonical trace the view renders from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub trace_id: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<BTreeMap<String, f64>>,
    pub candidates: Vec<Candidate>,
    pub decision: FusionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_flags: Option<BTreeMap<String, ProviderFlags>>,
}

/// Which backend field a candidate score was read from.
///
/// Scores are only comparable within one trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Raw,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub value: f64,
    pub kind: ScoreKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub source: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<Value>,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted: Option<bool>,
}

/// Which decision block the trace carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Fusion,
    Chosen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionDecision {
    /// Document id (fusion shape) or URL (chosen shape) of the winner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub rationale: Vec<String>,
    pub source: DecisionSource,
}

/// Policy block, kept as sent. Well-typed `redactions` and `conflict` are
/// lifted out for display; anything else, including off-type values of
/// those two keys, stays in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Policy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redactions: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Policy {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let mut policy = Policy::default();
        for (key, value) in obj {
            match (key.as_str(), value) {
                ("redactions", Value::Array(items)) => policy.redactions = Some(items.clone()),
                ("conflict", Value::Bool(b)) => policy.conflict = Some(*b),
                _ => {
                    policy.extra.insert(key.clone(), value.clone());
                }
            }
        }
        policy
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict.unwrap_or(false)
    }
}

/// Per-provider flags, kept as sent. Unknown or off-type fields land in
/// `extra` instead of failing the block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderFlags {
    fn from_value(value: &Value) -> Self {
        let mut flags = ProviderFlags::default();
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                flags.extra.insert("value".to_string(), value.clone());
                return flags;
            }
        };
        for (key, value) in obj {
            match key.as_str() {
                "timed_out" | "timedOut" if value.is_boolean() => flags.timed_out = value.as_bool(),
                "error" if !value.is_null() => flags.error = Some(value.clone()),
                "rate_limited_count" | "rateLimitedCount" if value.is_u64() => {
                    flags.rate_limited_count = value.as_u64()
                }
                _ => {
                    flags.extra.insert(key.clone(), value.clone());
                }
            }
        }
        flags
    }
}

impl Trace {
    /// Candidates ordered by descending score; unscored ones last.
    pub fn ranked_candidates(&self) -> Vec<&Candidate> {
        let mut ranked: Vec<&Candidate> = self.candidates.iter().collect();
        ranked.sort_by(|a, b| {
            let a = a.score.map(|s| s.value).unwrap_or(f64::NEG_INFINITY);
            let b = b.score.map(|s| s.value).unwrap_or(f64::NEG_INFINITY);
            b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

/// Map a raw trace payload of either shape into a [`Trace`].
///
/// Fails only when `trace_id`, `query`, or both decision blocks are missing.
pub fn reconcile_trace(raw: &Value) -> ClientResult<Trace> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ClientError::MalformedTrace("payload is not an object".to_string()))?;

    let trace_id = first_str(obj, &["trace_id", "traceId"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::MalformedTrace("missing trace_id".to_string()))?;
    let query = first_str(obj, &["query"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::MalformedTrace("missing query".to_string()))?;

    let decision = read_decision(obj)?;

    let candidates = obj
        .get("candidates")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(read_candidate).collect())
        .unwrap_or_default();

    let timings = first(obj, &["timings_ms", "timings", "timingsMs"])
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(stage, ms)| ms.as_f64().map(|ms| (stage.clone(), ms)))
                .collect()
        });

    let policy = obj
        .get("policy")
        .and_then(Value::as_object)
        .map(Policy::from_object);

    let provider_flags = first(obj, &["provider_flags", "providerFlags"])
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(provider, flags)| (provider.clone(), ProviderFlags::from_value(flags)))
                .collect()
        });

    Ok(Trace {
        trace_id,
        query,
        timings,
        candidates,
        decision,
        policy,
        provider_flags,
    })
}

fn read_decision(obj: &Map<String, Value>) -> ClientResult<FusionDecision> {
    if let Some(fusion) = obj.get("fusion").and_then(Value::as_object) {
        return Ok(FusionDecision {
            chosen_id: first_str(fusion, &["chosen_doc_id", "chosenId", "chosen_id"]),
            confidence: fusion.get("confidence").and_then(Value::as_f64),
            rationale: string_list(fusion.get("rationale")),
            source: DecisionSource::Fusion,
        });
    }

    if let Some(chosen) = obj.get("chosen").and_then(Value::as_object) {
        return Ok(FusionDecision {
            chosen_id: first_str(chosen, &["url"]).filter(|u| !u.is_empty()),
            confidence: chosen.get("score").and_then(Value::as_f64),
            rationale: string_list(chosen.get("explanations")),
            source: DecisionSource::Chosen,
        });
    }

    Err(ClientError::MalformedTrace(
        "neither fusion nor chosen decision present".to_string(),
    ))
}

fn read_candidate(value: &Value) -> Option<Candidate> {
    let obj = value.as_object()?;

    let score = match obj.get("raw_score").and_then(Value::as_f64) {
        Some(value) => Some(Score {
            value,
            kind: ScoreKind::Raw,
        }),
        None => obj.get("score").and_then(Value::as_f64).map(|value| Score {
            value,
            kind: ScoreKind::Score,
        }),
    };

    Some(Candidate {
        source: first_str(obj, &["source"]).unwrap_or_default(),
        url: first_str(obj, &["url"]).unwrap_or_default(),
        snippet: first_str(obj, &["snippet", "text", "excerpt"]),
        score,
        authority: obj.get("authority").filter(|v| !v.is_null()).cloned(),
        reasons: obj
            .get("reasons")
            .map(|r| string_list(Some(r)))
            .unwrap_or_default(),
        timing_ms: first(obj, &["timing_ms", "timingMs"]).and_then(Value::as_f64),
        redacted: obj.get("redacted").and_then(Value::as_bool),
    })
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first(obj, keys).and_then(Value::as_str).map(str::to_string)
}

/// A string becomes a one-item list; arrays keep their string items.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Fetch `GET /trace/{id}` and reconcile it.
pub async fn fetch_trace(transport: &Transport, id: &str) -> ClientResult<Trace> {
    let raw = transport
        .get_json(&format!("/trace/{}", encode_segment(id)))
        .await?;
    reconcile_trace(&raw)
}

/// CLI entry point for `onesource trace <id>`.
pub async fn run_trace(config: &Config, id: &str, as_json: bool) -> anyhow::Result<()> {
    let transport = Transport::new(&config.backend.base_url);

    let trace = match fetch_trace(&transport, id).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    } else {
        print!("{}", view::render_trace(&trace));
    }
    Ok(())
}
