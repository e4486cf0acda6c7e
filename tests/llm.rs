use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use diligence_guard::llm::{analyze_with_llm, analyze_with_llm_opts, CompletionBackend, LlmOptions};
use diligence_guard::{Category, Severity, Source};

/// Backend that replies with the same canned string for every chunk.
struct CannedBackend(String);

#[async_trait]
impl CompletionBackend for CannedBackend {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

struct FailingBackend;

#[async_trait]
impl CompletionBackend for FailingBackend {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("simulated provider outage")
    }
}

/// Backend that stalls on every chunk except the first.
struct StallingBackend {
    calls: Mutex<usize>,
}

#[async_trait]
impl CompletionBackend for StallingBackend {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        let call = {
            let mut n = self.calls.lock().unwrap();
            let call = *n;
            *n += 1;
            call
        };
        if call == 0 {
            Ok(r#"[{"category": "legal", "severity": "HIGH", "title": "From first chunk", "description": "d", "quote": "q", "score": 7}]"#.to_string())
        } else {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("[]".to_string())
        }
    }
}

fn quick_opts(max_chunk_chars: usize) -> LlmOptions {
    LlmOptions {
        max_chunk_chars,
        call_timeout: Duration::from_millis(200),
        chunk_pause: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn fenced_json_array_is_parsed_and_normalized() {
    let backend = CannedBackend(
        "Here is my analysis:\n```json\n[{\"category\": \"financial\", \"severity\": \"CRITICAL\", \
         \"title\": \"Undefined purchase price\", \"description\": \"The price is open\", \
         \"quote\": \"price to be agreed\", \"score\": 9, \
         \"recommendation\": \"Fix the price\"}]\n```\nLet me know if you need more."
            .to_string(),
    );
    let findings = analyze_with_llm(&backend, "some contract text").await;
    assert_eq!(findings.len(), 1);
    let f = &findings[0];
    assert_eq!(f.category, Category::Financial);
    assert_eq!(f.severity, Severity::Critical);
    assert_eq!(f.title, "Undefined purchase price");
    assert_eq!(f.location, "price to be agreed");
    assert_eq!(f.score, 9);
    assert_eq!(f.source, Source::Llm);
    assert_eq!(f.recommendation.as_deref(), Some("Fix the price"));
}

#[tokio::test]
async fn bare_array_with_surrounding_prose_is_parsed() {
    let backend = CannedBackend(
        "Sure! [{\"category\": \"tax\", \"severity\": \"LOW\", \"title\": \"T\", \
         \"description\": \"D\", \"quote\": \"Q\", \"score\": 2}] Hope this helps."
            .to_string(),
    );
    let findings = analyze_with_llm(&backend, "text").await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].category, Category::Tax);
    assert_eq!(findings[0].score, 2);
}

#[tokio::test]
async fn flags_object_and_single_object_shapes_are_accepted() {
    let wrapped = CannedBackend(
        r#"{"flags": [{"title": "A", "score": 3}, {"title": "B", "score": 4}]}"#.to_string(),
    );
    let findings = analyze_with_llm(&wrapped, "text").await;
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0].title, "A");
    assert_eq!(findings[1].title, "B");

    let single = CannedBackend(
        r#"{"category": "employee", "severity": "MEDIUM", "title": "Solo", "score": 6}"#
            .to_string(),
    );
    let findings = analyze_with_llm(&single, "text").await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].title, "Solo");
    assert_eq!(findings[0].category, Category::Employee);
}

#[tokio::test]
async fn garbage_response_yields_no_findings() {
    let backend = CannedBackend("I am unable to analyze this document.".to_string());
    let findings = analyze_with_llm(&backend, "text").await;
    assert!(findings.is_empty());
}

#[tokio::test]
async fn backend_error_yields_no_findings() {
    let findings = analyze_with_llm(&FailingBackend, "text").await;
    assert!(findings.is_empty());
}

#[tokio::test]
async fn empty_array_yields_no_findings() {
    let backend = CannedBackend("[]".to_string());
    let findings = analyze_with_llm(&backend, "a clean contract").await;
    assert!(findings.is_empty());
}

#[tokio::test]
async fn scores_are_clamped_or_defaulted() {
    let backend = CannedBackend(
        r#"[
            {"title": "too high", "score": 15},
            {"title": "too low", "score": 0},
            {"title": "stringly", "score": "8"},
            {"title": "nonsense", "score": "very risky"},
            {"title": "absent"}
        ]"#
        .to_string(),
    );
    let findings = analyze_with_llm(&backend, "text").await;
    let scores: Vec<u8> = findings.iter().map(|f| f.score).collect();
    assert_eq!(scores, vec![10, 1, 8, 5, 5]);
}

#[tokio::test]
async fn unknown_labels_fall_back_to_defaults() {
    let backend = CannedBackend(
        r#"[{"category": "astrology", "severity": "URGENT", "description": "no title either"}]"#
            .to_string(),
    );
    let findings = analyze_with_llm(&backend, "text").await;
    assert_eq!(findings.len(), 1);
    let f = &findings[0];
    assert_eq!(f.category, Category::Other);
    assert_eq!(f.severity, Severity::Medium);
    assert_eq!(f.title, "Model-identified risk");
    assert_eq!(f.location, "(no supporting quote)");
}

#[tokio::test]
async fn long_quotes_are_truncated() {
    let quote = "q".repeat(600);
    let backend = CannedBackend(format!(
        r#"[{{"title": "long quote", "quote": "{quote}", "score": 4}}]"#
    ));
    let findings = analyze_with_llm(&backend, "text").await;
    assert_eq!(findings[0].location.chars().count(), 500);
}

#[tokio::test(start_paused = true)]
async fn timed_out_chunk_is_skipped_but_earlier_findings_survive() {
    let backend = StallingBackend {
        calls: Mutex::new(0),
    };
    // two paragraphs, forced into two chunks by a tiny budget
    let text = format!("{}\n\n{}", "alpha ".repeat(10), "omega ".repeat(10));
    let findings = analyze_with_llm_opts(&backend, &text, &quick_opts(70)).await;
    assert_eq!(*backend.calls.lock().unwrap(), 2, "both chunks attempted");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].title, "From first chunk");
    assert_eq!(findings[0].source, Source::Llm);
}

/// Chunk responses are aggregated in document order.
struct EchoingBackend;

#[async_trait]
impl CompletionBackend for EchoingBackend {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let marker = if prompt.contains("alpha") {
            "first"
        } else {
            "second"
        };
        Ok(format!(r#"[{{"title": "{marker}", "score": 5}}]"#))
    }
}

#[tokio::test]
async fn multi_chunk_findings_keep_document_order() {
    let text = format!("{}\n\n{}", "alpha ".repeat(10), "omega ".repeat(10));
    let findings = analyze_with_llm_opts(&EchoingBackend, &text, &quick_opts(70)).await;
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0].title, "first");
    assert_eq!(findings[1].title, "second");
}
