//! Plain-text rendering of the canonical models.
//!
//! Every function here is pure: it takes a model and returns the text to
//! print. No network, no state.

use serde_json::Value;
use std::fmt::Write;

use crate::contract::{Answer, Provider};
use crate::error::ClientError;
use crate::linking::{LinkState, Linker, Transition};
use crate::trace::{DecisionSource, ScoreKind, Trace};

/// Render an answer. A policy banner, when present, comes first.
pub fn render_answer(answer: &Answer) -> String {
    let mut out = String::new();

    if let Some(banner) = &answer.policy_banner {
        let _ = writeln!(out, "[policy] {}", banner);
        out.push('\n');
    }

    let _ = writeln!(out, "{}", answer.text);
    out.push('\n');
    let _ = writeln!(out, "Confidence: {}%", answer.confidence_percent());
    let _ = writeln!(
        out,
        "Freshness:  {}",
        answer.freshness.format("%Y-%m-%d %H:%M UTC")
    );

    if !answer.citations.is_empty() {
        out.push_str("Sources:\n");
        for (i, c) in answer.citations.iter().enumerate() {
            let _ = writeln!(out, "  [{}] {} <{}>", i + 1, c.label, c.url);
        }
    }

    let _ = writeln!(out, "Trace:      {}", answer.trace_link());
    out
}

pub fn render_error(err: &ClientError) -> String {
    format!("Error: {}\n", err.user_message())
}

/// The action offered for a provider in its current state.
pub fn action_for(state: &LinkState) -> Option<&'static str> {
    match state {
        LinkState::Unknown => None,
        LinkState::Connected { .. } => Some("Disconnect"),
        LinkState::Disconnected => Some("Connect"),
        LinkState::AuthorizingExternally(_) => Some("Refresh"),
    }
}

pub fn render_connections(linker: &Linker) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<14} {:<26} ACTION", "PROVIDER", "STATUS");
    for (provider, state) in linker.states() {
        let status = match state {
            LinkState::Unknown => "checking...".to_string(),
            LinkState::Connected { workspace: Some(ws) } => format!("connected ({})", ws),
            LinkState::Connected { workspace: None } => "connected".to_string(),
            LinkState::Disconnected => match linker.outcome(provider) {
                Some(a) if a.state == crate::linking::AttemptState::Failed => {
                    "not connected (gave up)".to_string()
                }
                _ => "not connected".to_string(),
            },
            LinkState::AuthorizingExternally(a) => {
                format!("waiting since {}", a.opened_at.format("%H:%M:%S"))
            }
        };
        let _ = writeln!(
            out,
            "{:<14} {:<26} {}",
            provider.display_name(),
            status,
            action_for(state).map(|a| format!("[{}]", a)).unwrap_or_default()
        );
    }
    out
}

pub fn render_transition(t: &Transition) -> String {
    format!("{}: {} -> {}\n", t.provider.display_name(), t.from, t.to)
}

pub fn render_trace(trace: &Trace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Trace {}", trace.trace_id);
    let _ = writeln!(out, "Query: {}", trace.query);

    if let Some(timings) = &trace.timings {
        let stages: Vec<String> = timings
            .iter()
            .map(|(stage, ms)| format!("{} {}ms", stage, ms))
            .collect();
        let _ = writeln!(out, "Timings: {}", stages.join(", "));
    }

    out.push_str("\nDecision");
    match trace.decision.source {
        DecisionSource::Fusion => out.push_str(" (fusion)\n"),
        DecisionSource::Chosen => out.push_str(" (chosen)\n"),
    }
    if let Some(id) = &trace.decision.chosen_id {
        let _ = writeln!(out, "  chosen:     {}", id);
    }
    if let Some(conf) = trace.decision.confidence {
        let _ = writeln!(out, "  confidence: {:.2}", conf);
    }
    if trace.decision.rationale.is_empty() {
        out.push_str("  rationale:  (none given)\n");
    } else {
        let _ = writeln!(out, "  rationale:  {}", trace.decision.rationale.join("; "));
    }

    let _ = writeln!(out, "\nCandidates ({})", trace.candidates.len());
    for (rank, c) in trace.ranked_candidates().iter().enumerate() {
        let score = match c.score {
            Some(s) if s.kind == ScoreKind::Raw => format!("raw {:.3}", s.value),
            Some(s) => format!("{:.3}", s.value),
            None => "-".to_string(),
        };
        let _ = writeln!(out, "  {}. [{}] {} {}", rank + 1, c.source, score, c.url);
        if let Some(snippet) = &c.snippet {
            let _ = writeln!(out, "       {}", snippet);
        }
        if !c.reasons.is_empty() {
            let _ = writeln!(out, "       reasons: {}", c.reasons.join(", "));
        }
        if c.redacted == Some(true) {
            out.push_str("       (redacted)\n");
        }
        if let Some(ms) = c.timing_ms {
            let _ = writeln!(out, "       {}ms", ms);
        }
    }

    if let Some(policy) = &trace.policy {
        out.push_str("\nPolicy\n");
        let _ = writeln!(out, "  conflict:   {}", if policy.is_conflict() { "yes" } else { "no" });
        if let Some(redactions) = policy.redactions.as_ref().filter(|r| !r.is_empty()) {
            let labels: Vec<String> = redactions.iter().map(value_label).collect();
            let _ = writeln!(out, "  redactions: {}", labels.join(", "));
        }
        for (key, value) in &policy.extra {
            let _ = writeln!(out, "  {}: {}", key, value_label(value));
        }
    }

    if let Some(flags) = &trace.provider_flags {
        out.push_str("\nProviders\n");
        for (provider, f) in flags {
            let mut notes = Vec::new();
            if f.timed_out == Some(true) {
                notes.push("timed out".to_string());
            }
            if let Some(err) = &f.error {
                notes.push(format!("error: {}", value_label(err)));
            }
            if let Some(n) = f.rate_limited_count.filter(|n| *n > 0) {
                notes.push(format!("rate limited x{}", n));
            }
            for (key, value) in &f.extra {
                notes.push(format!("{}={}", key, value_label(value)));
            }
            if notes.is_empty() {
                notes.push("ok".to_string());
            }
            let _ = writeln!(out, "  {:<8} {}", provider, notes.join(", "));
        }
    }

    out
}

/// Strings print bare; anything else prints as compact JSON.
fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shell help, listing the actions per provider as well.
pub fn render_help() -> String {
    let providers: Vec<&str> = Provider::ALL.iter().map(|p| p.as_str()).collect();
    format!(
        "Commands:\n  \
         ask <question>        ask the backend\n  \
         trace [id]            show the trace for the last answer or an id\n  \
         close                 close the trace view\n  \
         status | refresh      re-fetch connection status\n  \
         connect <provider>    link a provider ({})\n  \
         stop <provider>       stop waiting for an authorization\n  \
         disconnect <provider> unlink a provider\n  \
         install <provider>    open the provider install page\n  \
         quit\n",
        providers.join(", ")
    )
}
