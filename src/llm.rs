//! LLM-assisted red-flag analysis.
//!
//! Chunks a document, sends each chunk through a fixed analysis prompt to a
//! pluggable completion backend, and normalizes whatever comes back into the
//! same [`Finding`] contract the rule engine produces. Every failure mode
//! degrades to fewer findings; nothing here propagates an error to the caller.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{chunk_text, next_finding_id, Category, Finding, Severity, Source, DEFAULT_CHUNK_CHARS};

/// Narrow seam to the text-completion backend. The integration layer is
/// responsible for collapsing SDK-specific response shapes into one string.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub max_chunk_chars: usize,
    pub call_timeout: Duration,
    pub chunk_pause: Duration,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_CHUNK_CHARS,
            call_timeout: Duration::from_secs(60),
            chunk_pause: Duration::from_millis(500),
        }
    }
}

const ANALYSIS_PROMPT: &str = r#"You are an M&A due-diligence analyst reviewing a contract excerpt for risk indicators.

Identify red flags in the text below. Respond with ONLY a JSON array; each element must have these fields:
  "category": one of jurisdiction, financial, legal, operational, compliance, vague_language, missing_info, liability, intellectual_property, tax, employee, customer, other
  "severity": one of CRITICAL, HIGH, MEDIUM, LOW
  "title": short label for the risk
  "description": why this passage is risky for the buyer
  "quote": the exact passage that triggered the flag
  "score": integer risk weight from 1 to 10
  "recommendation": suggested remediation

Return [] if no red flags are present.

Contract text:
{chunk}"#;

fn build_prompt(chunk: &str) -> String {
    ANALYSIS_PROMPT.replace("{chunk}", chunk)
}

/// Analyze `text` with the completion backend using default options.
pub async fn analyze_with_llm(backend: &dyn CompletionBackend, text: &str) -> Vec<Finding> {
    analyze_with_llm_opts(backend, text, &LlmOptions::default()).await
}

/// Chunked, strictly sequential analysis. Chunks that time out, error, or
/// return unparsable text contribute no findings; the rest still run.
pub async fn analyze_with_llm_opts(
    backend: &dyn CompletionBackend,
    text: &str,
    opts: &LlmOptions,
) -> Vec<Finding> {
    let chunks = chunk_text(text, opts.max_chunk_chars);
    let total = chunks.len();
    let mut findings: Vec<Finding> = Vec::new();

    for (idx, chunk) in chunks.iter().enumerate() {
        let prompt = build_prompt(chunk);
        match tokio::time::timeout(opts.call_timeout, backend.complete(&prompt)).await {
            Err(_) => {
                warn!(chunk = idx, "completion backend timed out; skipping chunk");
            }
            Ok(Err(err)) => {
                warn!(chunk = idx, error = %err, "completion backend failed; skipping chunk");
            }
            Ok(Ok(raw)) => {
                let flags = parse_model_flags(&raw);
                debug!(chunk = idx, flags = flags.len(), "parsed model response");
                findings.extend(flags.into_iter().map(normalize_flag));
            }
        }
        // pacing courtesy between chunks, not after the last
        if idx + 1 < total {
            tokio::time::sleep(opts.chunk_pause).await;
        }
    }
    findings
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResponseParseError {
    #[error("model response was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON array or object, got {0}")]
    UnexpectedShape(&'static str),
}

static FENCED_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// Pull the JSON payload out of a raw completion: a fenced code block if one
/// is present, else the slice between the first `[` and the last `]`, else
/// the trimmed response itself (covers a bare object).
fn extract_json_payload(raw: &str) -> &str {
    if let Some(caps) = FENCED_BLOCK_RE.captures(raw) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim();
        }
    }
    if let (Some(open), Some(close)) = (raw.find('['), raw.rfind(']')) {
        if open < close {
            return &raw[open..=close];
        }
    }
    raw.trim()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelFlag {
    category: Option<String>,
    severity: Option<String>,
    title: Option<String>,
    description: Option<String>,
    quote: Option<String>,
    location: Option<String>,
    score: Option<Value>,
    recommendation: Option<String>,
}

fn parse_model_flags(raw: &str) -> Vec<ModelFlag> {
    match try_parse_model_flags(raw) {
        Ok(flags) => flags,
        Err(err) => {
            warn!(error = %err, "discarding unparsable model response");
            Vec::new()
        }
    }
}

fn try_parse_model_flags(raw: &str) -> Result<Vec<ModelFlag>, ResponseParseError> {
    let payload = extract_json_payload(raw);
    let value: Value = serde_json::from_str(payload)?;

    // accepted shapes: bare array, {"flags": [...]}, or a single object
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("flags") {
                items.clone()
            } else {
                vec![Value::Object(map)]
            }
        }
        _ => return Err(ResponseParseError::UnexpectedShape("scalar")),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ModelFlag>(item).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// Normalization into the shared Finding contract
// ---------------------------------------------------------------------------

const MAX_LOCATION_CHARS: usize = 500;
const DEFAULT_SCORE: u8 = 5;

fn normalize_flag(flag: ModelFlag) -> Finding {
    let category = flag
        .category
        .as_deref()
        .map(Category::from_label)
        .unwrap_or(Category::Other);
    let severity = flag
        .severity
        .as_deref()
        .map(Severity::from_label)
        .unwrap_or(Severity::Medium);
    let location = flag
        .quote
        .or(flag.location)
        .map(|q| truncate_chars(&q, MAX_LOCATION_CHARS))
        .unwrap_or_else(|| "(no supporting quote)".to_string());

    Finding {
        id: next_finding_id(),
        category,
        severity,
        title: flag
            .title
            .unwrap_or_else(|| "Model-identified risk".to_string()),
        description: flag.description.unwrap_or_default(),
        location,
        score: normalize_score(flag.score.as_ref()),
        source: Source::Llm,
        recommendation: flag.recommendation,
    }
}

/// Integer parse then clamp to 1..=10; anything unparseable becomes 5.
fn normalize_score(raw: Option<&Value>) -> u8 {
    let parsed = match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) => n.clamp(1, 10) as u8,
        None => DEFAULT_SCORE,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
