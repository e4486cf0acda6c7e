use std::cmp::min;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

pub mod llm;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lenient parse for model-supplied labels. Unknown input maps to Medium.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "LOW" => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Jurisdiction,
    Financial,
    Legal,
    Operational,
    Compliance,
    VagueLanguage,
    MissingInfo,
    Liability,
    IntellectualProperty,
    Tax,
    Employee,
    Customer,
    Other,
}

impl Category {
    /// Lenient parse for model-supplied labels. Unknown input maps to Other.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "jurisdiction" => Self::Jurisdiction,
            "financial" => Self::Financial,
            "legal" => Self::Legal,
            "operational" => Self::Operational,
            "compliance" => Self::Compliance,
            "vague_language" => Self::VagueLanguage,
            "missing_info" => Self::MissingInfo,
            "liability" => Self::Liability,
            "intellectual_property" => Self::IntellectualProperty,
            "tax" => Self::Tax,
            "employee" => Self::Employee,
            "customer" => Self::Customer,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    RuleEngine,
    Llm,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub id: u32,
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: String,
    pub score: u8,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

static NEXT_FINDING_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_finding_id() -> u32 {
    NEXT_FINDING_ID.fetch_add(1, Ordering::Relaxed)
}

impl Finding {
    fn from_rule(
        category: Category,
        severity: Severity,
        score: u8,
        title: String,
        description: String,
        location: String,
        recommendation: &str,
    ) -> Self {
        Self {
            id: next_finding_id(),
            category,
            severity,
            title,
            description,
            location,
            score,
            source: Source::RuleEngine,
            recommendation: Some(recommendation.to_string()),
        }
    }
}

/// Sentinel location used when a finding reports an absence rather than a match.
pub const NOT_FOUND_LOCATION: &str = "Provision not found in document";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const EXCERPT_RADIUS: usize = 150;

/// Bounded excerpt of `text` around the byte span `start..end`.
/// The core is a contiguous substring containing the span; clamped sides get
/// an ellipsis marker.
pub fn excerpt(text: &str, start: usize, end: usize, radius: usize) -> String {
    let start = min(start, text.len());
    let end = min(end.max(start), text.len());

    let from = snap_to_char_boundary(text, start.saturating_sub(radius), false);
    let to = snap_to_char_boundary(text, min(text.len(), end.saturating_add(radius)), true);

    let core = text[from..to].trim();
    let prefix = if from > 0 { "..." } else { "" };
    let suffix = if to < text.len() { "..." } else { "" };
    format!("{prefix}{core}{suffix}")
}

/// Snap a byte offset to a valid char boundary.
/// If `forward` is true, snap forward; otherwise snap backward.
pub(crate) fn snap_to_char_boundary(text: &str, pos: usize, forward: bool) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    if text.is_char_boundary(pos) {
        return pos;
    }
    if forward {
        let mut p = pos;
        while p < text.len() && !text.is_char_boundary(p) {
            p += 1;
        }
        p
    } else {
        let mut p = pos;
        while p > 0 && !text.is_char_boundary(p) {
            p -= 1;
        }
        p
    }
}

/// Build a pattern that matches `term` even when PDF extraction inserted
/// whitespace between letters ("Cayman" as well as "C a y m a n").
/// Alphanumeric characters keep a whitespace allowance; everything else
/// (spaces, hyphens, parentheses) becomes a non-word-character allowance, so
/// "non-binding" matches "non-binding", "nonbinding", and "non binding"
/// alike.
pub fn fuzzy_pattern(term: &str) -> String {
    let mut pat = String::new();
    for ch in term.chars() {
        if ch.is_alphanumeric() {
            let mut buf = [0u8; 4];
            pat.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            pat.push_str(r"\s*");
        } else {
            pat.push_str(r"\W*");
        }
    }
    // drop the trailing allowance
    pat.truncate(pat.len().saturating_sub(3));
    pat
}

fn fuzzy_regex(term: &str) -> Regex {
    Regex::new(&format!("(?i){}", fuzzy_pattern(term))).unwrap()
}

/// Whole-word matcher; multi-word terms tolerate arbitrary whitespace between
/// their words.
fn word_regex(term: &str) -> Regex {
    let joined = term
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    Regex::new(&format!(r"(?i)\b{joined}\b")).unwrap()
}

// ---------------------------------------------------------------------------
// Rule catalogs (data, not code branching)
// ---------------------------------------------------------------------------

const OFFSHORE_JURISDICTIONS: &[&str] = &[
    "Cayman",
    "British Virgin Islands",
    "Bermuda",
    "Isle of Man",
    "Jersey",
    "Guernsey",
    "Gibraltar",
    "Luxembourg",
    "Liechtenstein",
    "Panama",
    "Seychelles",
    "Mauritius",
    "Bahamas",
    "Belize",
    "Marshall Islands",
    "Vanuatu",
];

/// Context words that escalate an offshore mention to CRITICAL.
const GOVERNING_CONTEXT_TERMS: &[&str] = &["governing law", "arbitration", "dispute resolution"];

static OFFSHORE_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| OFFSHORE_JURISDICTIONS.iter().map(|j| fuzzy_regex(j)).collect());

const VAGUE_TERMS: &[&str] = &[
    "reasonable",
    "material",
    "substantially",
    "good faith",
    "best efforts",
    "commercially reasonable",
    "satisfactory",
    "appropriate",
    "customary",
    "as soon as practicable",
];

const VAGUE_TERM_MAX_USES: usize = 3;

static VAGUE_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| VAGUE_TERMS.iter().map(|t| word_regex(t)).collect());

const DEFERRAL_PHRASES: &[&str] = &[
    "to be provided",
    "subject to",
    "to be determined",
    "to be agreed",
    "under negotiation",
];

static DEFERRAL_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| DEFERRAL_PHRASES.iter().map(|p| fuzzy_regex(p)).collect());

/// Case-insensitive substrings indicating schedules or exhibits were left out.
const SCHEDULE_INDICATORS: &[&str] = &[
    "schedule to be provided",
    "schedules to be provided",
    "schedule to follow",
    "schedules to follow",
    "to be attached",
    "intentionally omitted",
    "exhibit to follow",
    "disclosure schedules will be delivered",
];

static SCHEDULE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    SCHEDULE_INDICATORS
        .iter()
        .map(|s| Regex::new(&format!("(?i){}", regex::escape(s))).unwrap())
        .collect()
});

struct ProvisionRule {
    name: &'static str,
    synonyms: &'static [&'static str],
    category: Category,
    severity: Severity,
    score: u8,
    recommendation: &'static str,
}

const REQUIRED_PROVISIONS: &[ProvisionRule] = &[
    ProvisionRule {
        name: "Escrow",
        synonyms: &["escrow", "holdback", "hold-back"],
        category: Category::Financial,
        severity: Severity::High,
        score: 7,
        recommendation: "Add an escrow or holdback securing indemnification claims.",
    },
    ProvisionRule {
        name: "Survival",
        synonyms: &["survival", "shall survive", "survive the closing"],
        category: Category::Legal,
        severity: Severity::High,
        score: 7,
        recommendation: "Specify how long representations and warranties survive the closing.",
    },
    ProvisionRule {
        name: "Material Adverse Change",
        synonyms: &["material adverse change", "material adverse effect"],
        category: Category::Legal,
        severity: Severity::High,
        score: 7,
        recommendation: "Add a MAC clause allowing the buyer to walk if the business deteriorates before closing.",
    },
    ProvisionRule {
        name: "Liability Cap",
        synonyms: &[
            "liability cap",
            "cap on liability",
            "limitation of liability",
            "aggregate liability",
        ],
        category: Category::Liability,
        severity: Severity::High,
        score: 7,
        recommendation: "Negotiate an explicit cap on indemnification liability.",
    },
    ProvisionRule {
        name: "Environmental",
        synonyms: &["environmental", "hazardous materials", "hazardous substances"],
        category: Category::Compliance,
        severity: Severity::High,
        score: 7,
        recommendation: "Add environmental representations covering permits and hazardous materials.",
    },
    ProvisionRule {
        name: "Employee Benefits",
        synonyms: &["employee benefit", "employee benefits", "401(k)", "pension"],
        category: Category::Employee,
        severity: Severity::High,
        score: 7,
        recommendation: "Address treatment of employee benefit plans and accrued obligations.",
    },
    ProvisionRule {
        name: "Confidentiality",
        synonyms: &["confidential", "confidentiality", "non-disclosure", "nondisclosure"],
        category: Category::Legal,
        severity: Severity::Critical,
        score: 10,
        recommendation: "Add a confidentiality provision before exchanging diligence materials.",
    },
];

static PROVISION_PATTERNS: Lazy<Vec<Vec<Regex>>> = Lazy::new(|| {
    REQUIRED_PROVISIONS
        .iter()
        .map(|p| p.synonyms.iter().map(|s| fuzzy_regex(s)).collect())
        .collect()
});

const REGULATORY_TERMS: &[&str] = &["FERC", "regulatory approval", "antitrust"];

static REGULATORY_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| REGULATORY_TERMS.iter().map(|t| fuzzy_regex(t)).collect());

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

static AUDIT_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\baudit(?:ed|s)?\b[^.\n]{0,80}?\b(19\d{2}|20\d{2}|\d{2})\b").unwrap()
});

static EARNOUT_UNDEFINED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bearn[-\s]?outs?\b[^.]{0,120}?(?:undefined|to\s+be\s+determined|mutually\s+agreed)")
        .unwrap()
});

static DEFERRED_PAYMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdeferred\b[^.]{0,120}?(?:performance\s+metrics|to\s+be\s+determined)")
        .unwrap()
});

static SURVIVAL_PERIOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:surviv\w*|representations?)\b[^.]{0,80}?\b(\d{1,3})\s*(months?|days?)\b")
        .unwrap()
});

static CONCENTRATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btop\s+(\d{1,3})\s+customers?\b[^.]{0,80}?\b(\d{1,3}(?:\.\d+)?)\s*%").unwrap()
});

static TRANSITION_PERIOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:transition|integration)\b[^.]{0,80}?\b(\d{1,3})\s*(days?|weeks?)\b")
        .unwrap()
});

static CLAIM_NOTICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:claims?|indemnification)\s+notice\b[^.]{0,80}?\b(\d{1,3})\s*(days?|weeks?)\b")
        .unwrap()
});

static STOCK_CONSIDERATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*shares?\s+of\s+(?:the\s+)?(buyer|purchaser|parent)\b")
        .unwrap()
});

static LOI_MARKER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["letter of intent", "term sheet", "memorandum of understanding"]
        .iter()
        .map(|t| fuzzy_regex(t))
        .collect()
});

/// Preliminary documents get the LOI-specific checks; definitive agreements
/// do not.
fn is_preliminary_document(text: &str) -> bool {
    LOI_MARKER_PATTERNS.iter().any(|pat| pat.is_match(text))
}

static NONBINDING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["non-binding", "not binding", "nonbinding"]
        .iter()
        .map(|t| fuzzy_regex(t))
        .collect()
});

static EXCLUSIVITY_PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bexclusiv\w*\b[^.]{0,80}?\b(\d{1,3})\s*days?\b").unwrap());

static FINANCIAL_STATEMENTS_RE: Lazy<Regex> = Lazy::new(|| fuzzy_regex("financial statements"));

static LEGAL_WORD_RE: Lazy<Regex> = Lazy::new(|| word_regex("legal"));

// ---------------------------------------------------------------------------
// Rule implementations
// ---------------------------------------------------------------------------

fn rule_offshore_jurisdictions(text: &str, findings: &mut Vec<Finding>) {
    for (jurisdiction, pat) in OFFSHORE_JURISDICTIONS.iter().zip(OFFSHORE_PATTERNS.iter()) {
        let mut fallback: Option<String> = None;
        let mut critical: Option<String> = None;
        for m in pat.find_iter(text) {
            let ctx = excerpt(text, m.start(), m.end(), EXCERPT_RADIUS);
            let lowered = ctx.to_lowercase();
            if GOVERNING_CONTEXT_TERMS.iter().any(|t| lowered.contains(t)) {
                critical = Some(ctx);
                break;
            }
            if fallback.is_none() {
                fallback = Some(ctx);
            }
        }
        let (severity, score, location) = match (critical, fallback) {
            (Some(ctx), _) => (Severity::Critical, 9, ctx),
            (None, Some(ctx)) => (Severity::High, 7, ctx),
            (None, None) => continue,
        };
        findings.push(Finding::from_rule(
            Category::Jurisdiction,
            severity,
            score,
            format!("Offshore Jurisdiction: {jurisdiction}"),
            format!(
                "The document references {jurisdiction}, a jurisdiction commonly used for \
                 offshore structuring. Offshore governing law or dispute resolution can \
                 complicate enforcement and diligence."
            ),
            location,
            "Confirm why an offshore jurisdiction is involved and review enforceability with local counsel.",
        ));
    }
}

fn rule_vague_language(text: &str, findings: &mut Vec<Finding>) {
    for (term, pat) in VAGUE_TERMS.iter().zip(VAGUE_PATTERNS.iter()) {
        let mut matches = pat.find_iter(text);
        let first = match matches.next() {
            Some(m) => m,
            None => continue,
        };
        let count = 1 + matches.count();
        if count <= VAGUE_TERM_MAX_USES {
            continue;
        }
        findings.push(Finding::from_rule(
            Category::VagueLanguage,
            Severity::Medium,
            5,
            format!("Excessive Vague Language: \"{term}\" ({count} uses)"),
            format!(
                "The hedge term \"{term}\" appears {count} times. Heavy reliance on \
                 undefined qualifiers leaves obligations open to interpretation."
            ),
            excerpt(text, first.start(), first.end(), EXCERPT_RADIUS),
            "Replace hedge terms with defined standards or objective thresholds.",
        ));
    }
}

fn rule_deferral_phrases(text: &str, findings: &mut Vec<Finding>) {
    for (phrase, pat) in DEFERRAL_PHRASES.iter().zip(DEFERRAL_PATTERNS.iter()) {
        if let Some(m) = pat.find(text) {
            findings.push(Finding::from_rule(
                Category::MissingInfo,
                Severity::High,
                8,
                format!("High-Risk Deferral Phrase: \"{phrase}\""),
                format!(
                    "The phrase \"{phrase}\" defers a material term to a later date, \
                     leaving the obligation unsettled at signing."
                ),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Resolve deferred terms before signing, or make closing conditional on their delivery.",
            ));
        }
    }
}

fn rule_missing_schedules(text: &str, findings: &mut Vec<Finding>) {
    // reported at most once per document
    for pat in SCHEDULE_PATTERNS.iter() {
        if let Some(m) = pat.find(text) {
            findings.push(Finding::from_rule(
                Category::MissingInfo,
                Severity::Critical,
                10,
                "Missing or Incomplete Schedules".to_string(),
                "The document indicates that schedules or exhibits are incomplete or will \
                 be delivered later. Disclosure schedules are where liabilities hide."
                    .to_string(),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Obtain and review all schedules and exhibits before signing.",
            ));
            return;
        }
    }
}

fn rule_outdated_audit(text: &str, findings: &mut Vec<Finding>) {
    let current_year = time::OffsetDateTime::now_utc().year();
    for caps in AUDIT_YEAR_RE.captures_iter(text) {
        let raw = &caps[1];
        let year: i32 = match raw.parse() {
            Ok(y) => y,
            Err(_) => continue,
        };
        // two-digit years: pivot at 50 ("98" is 1998, "23" is 2023)
        let year = if raw.len() == 2 {
            if year < 50 {
                2000 + year
            } else {
                1900 + year
            }
        } else {
            year
        };
        if current_year - year > 2 {
            let m = caps.get(0).unwrap();
            findings.push(Finding::from_rule(
                Category::Financial,
                Severity::High,
                7,
                format!("Outdated Audited Financials ({year})"),
                format!(
                    "The most recent audit referenced is from {year}, more than two years \
                     old. Stale financials can conceal deterioration in the business."
                ),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Request current audited financial statements and interim statements through the latest quarter.",
            ));
            return;
        }
    }
}

fn rule_undefined_earnout(text: &str, findings: &mut Vec<Finding>) {
    if let Some(m) = EARNOUT_UNDEFINED_RE.find(text) {
        findings.push(Finding::from_rule(
            Category::Financial,
            Severity::Critical,
            10,
            "Undefined Earnout Terms".to_string(),
            "Earnout consideration is left undefined or subject to future agreement. \
             Undefined earnouts are a leading source of post-closing disputes."
                .to_string(),
            excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
            "Define earnout metrics, measurement periods, targets, and dispute resolution before signing.",
        ));
    }
    if let Some(m) = DEFERRED_PAYMENT_RE.find(text) {
        findings.push(Finding::from_rule(
            Category::Financial,
            Severity::High,
            8,
            "Deferred Payment Without Defined Terms".to_string(),
            "Deferred consideration is tied to performance metrics or amounts that are \
             not yet determined."
                .to_string(),
            excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
            "Specify the metrics and calculation methodology governing any deferred payment.",
        ));
    }
}

fn rule_short_survival(text: &str, findings: &mut Vec<Finding>) {
    for caps in SURVIVAL_PERIOD_RE.captures_iter(text) {
        let n: u32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let unit = caps[2].to_lowercase();
        // normalize days to months before comparing against the 12-month floor
        let months = if unit.starts_with("day") { n / 30 } else { n };
        if months < 12 {
            let m = caps.get(0).unwrap();
            findings.push(Finding::from_rule(
                Category::Legal,
                Severity::High,
                7,
                format!("Short Survival Period ({n} {unit})"),
                "Representations and warranties survive for less than twelve months, \
                 leaving little time to discover and assert claims."
                    .to_string(),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Extend survival to at least 12-18 months (longer for fundamental and tax representations).",
            ));
            return;
        }
    }
}

fn rule_customer_concentration(text: &str, findings: &mut Vec<Finding>) {
    for caps in CONCENTRATION_RE.captures_iter(text) {
        let top_n = caps[1].to_string();
        let pct: f64 = match caps[2].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if pct <= 50.0 {
            continue;
        }
        let (severity, score) = if pct > 70.0 {
            (Severity::Critical, 9)
        } else {
            (Severity::High, 7)
        };
        let m = caps.get(0).unwrap();
        findings.push(Finding::from_rule(
            Category::Customer,
            severity,
            score,
            format!("High Customer Concentration (top {top_n}: {pct}%)"),
            format!(
                "The top {top_n} customers represent {pct}% of revenue. Concentrated \
                 revenue magnifies the impact of losing a single relationship after \
                 closing."
            ),
            excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
            "Review customer contracts for change-of-control clauses and consider an earnout or holdback tied to retention.",
        ));
    }
}

fn rule_required_provisions(text: &str, findings: &mut Vec<Finding>) {
    for (provision, patterns) in REQUIRED_PROVISIONS.iter().zip(PROVISION_PATTERNS.iter()) {
        if patterns.iter().any(|pat| pat.is_match(text)) {
            continue;
        }
        findings.push(Finding::from_rule(
            provision.category,
            provision.severity,
            provision.score,
            format!("Missing {} Provision", provision.name),
            format!(
                "No {} language was found anywhere in the document. Standard M&A \
                 agreements address this provision explicitly.",
                provision.name.to_lowercase()
            ),
            NOT_FOUND_LOCATION.to_string(),
            provision.recommendation,
        ));
    }
}

fn rule_regulatory(text: &str, findings: &mut Vec<Finding>) {
    for (term, pat) in REGULATORY_TERMS.iter().zip(REGULATORY_PATTERNS.iter()) {
        if let Some(m) = pat.find(text) {
            findings.push(Finding::from_rule(
                Category::Compliance,
                Severity::High,
                8,
                format!("Regulatory Risk: {term}"),
                format!(
                    "The document references \"{term}\". Regulatory approvals can delay \
                     or block closing and may impose conditions on the combined business."
                ),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Map the required approvals, their timelines, and which party bears the regulatory risk.",
            ));
        }
    }
}

fn rule_short_timing_windows(text: &str, findings: &mut Vec<Finding>) {
    let in_days = |n: u32, unit: &str| if unit.starts_with("week") { n * 7 } else { n };

    for caps in TRANSITION_PERIOD_RE.captures_iter(text) {
        let n: u32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let days = in_days(n, &caps[2].to_lowercase());
        if days < 90 {
            let m = caps.get(0).unwrap();
            findings.push(Finding::from_rule(
                Category::Operational,
                Severity::Medium,
                6,
                format!("Short Transition Period ({days} days)"),
                "The transition or integration support window is under 90 days, which is \
                 rarely enough to migrate customers, systems, and staff."
                    .to_string(),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Extend transition services to at least 90-180 days with defined service levels.",
            ));
            break;
        }
    }

    for caps in CLAIM_NOTICE_RE.captures_iter(text) {
        let n: u32 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let days = in_days(n, &caps[2].to_lowercase());
        if days < 90 {
            let m = caps.get(0).unwrap();
            findings.push(Finding::from_rule(
                Category::Legal,
                Severity::Medium,
                5,
                format!("Short Claim Notice Period ({days} days)"),
                "Indemnification claims must be noticed within less than 90 days, which \
                 can extinguish claims before issues surface."
                    .to_string(),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Lengthen the claim notice window or make notice timing non-prejudicial.",
            ));
            break;
        }
    }
}

fn rule_stock_consideration(text: &str, findings: &mut Vec<Finding>) {
    for caps in STOCK_CONSIDERATION_RE.captures_iter(text) {
        let ratio = caps[1].to_string();
        let party = caps[2].to_lowercase();
        let m = caps.get(0).unwrap();
        findings.push(Finding::from_rule(
            Category::Financial,
            Severity::Low,
            3,
            format!("Stock Consideration ({ratio} shares of {party})"),
            "Part of the consideration is paid in acquirer stock, exposing the seller to \
             the buyer's share price and the buyer to dilution."
                .to_string(),
            excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
            "Confirm valuation, registration rights, and lock-up terms for the stock component.",
        ));
    }
}

fn rule_binding_loi(text: &str, findings: &mut Vec<Finding>) {
    let marker = LOI_MARKER_PATTERNS.iter().find_map(|pat| pat.find(text));
    let marker = match marker {
        Some(m) => m,
        None => return,
    };
    if NONBINDING_PATTERNS.iter().any(|pat| pat.is_match(text)) {
        return;
    }
    findings.push(Finding::from_rule(
        Category::Legal,
        Severity::Critical,
        9,
        "Potentially Binding Letter of Intent".to_string(),
        "The document presents as a letter of intent or term sheet but contains no \
         non-binding disclaimer, risking an inadvertent binding contract."
            .to_string(),
        excerpt(text, marker.start(), marker.end(), EXCERPT_RADIUS),
        "State explicitly that the document is non-binding except for designated provisions such as exclusivity and confidentiality.",
    ));
}

fn rule_short_exclusivity(text: &str, findings: &mut Vec<Finding>) {
    if !is_preliminary_document(text) {
        return;
    }
    for caps in EXCLUSIVITY_PERIOD_RE.captures_iter(text) {
        let days: u32 = match caps[1].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if days < 45 {
            let m = caps.get(0).unwrap();
            findings.push(Finding::from_rule(
                Category::Operational,
                Severity::Medium,
                5,
                format!("Short Exclusivity Period ({days} days)"),
                "The exclusivity window is under 45 days, which is usually too short to \
                 complete full due diligence."
                    .to_string(),
                excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
                "Extend exclusivity to 60-90 days to allow for complete diligence.",
            ));
            return;
        }
    }
}

fn rule_restrictive_diligence_scope(text: &str, findings: &mut Vec<Finding>) {
    if !is_preliminary_document(text) {
        return;
    }
    let m = match FINANCIAL_STATEMENTS_RE.find(text) {
        Some(m) => m,
        None => return,
    };
    if LEGAL_WORD_RE.is_match(text) {
        return;
    }
    findings.push(Finding::from_rule(
        Category::Operational,
        Severity::Medium,
        5,
        "Restrictive Due Diligence Scope".to_string(),
        "Due diligence appears limited to financial statements with no mention of legal \
         review, leaving litigation, IP, and compliance exposure unexamined."
            .to_string(),
        excerpt(text, m.start(), m.end(), EXCERPT_RADIUS),
        "Expand diligence scope to legal, IP, HR, and tax materials.",
    ));
}

// ---------------------------------------------------------------------------
// Rule-based analyzer
// ---------------------------------------------------------------------------

type RuleFn = fn(&str, &mut Vec<Finding>);

const RULE_CATALOG: &[(&str, RuleFn)] = &[
    ("offshore_jurisdiction", rule_offshore_jurisdictions),
    ("vague_language", rule_vague_language),
    ("deferral_phrases", rule_deferral_phrases),
    ("missing_schedules", rule_missing_schedules),
    ("outdated_audit", rule_outdated_audit),
    ("undefined_earnout", rule_undefined_earnout),
    ("short_survival", rule_short_survival),
    ("customer_concentration", rule_customer_concentration),
    ("required_provisions", rule_required_provisions),
    ("regulatory", rule_regulatory),
    ("short_timing_windows", rule_short_timing_windows),
    ("stock_consideration", rule_stock_consideration),
    ("binding_loi", rule_binding_loi),
    ("short_exclusivity", rule_short_exclusivity),
    ("restrictive_diligence_scope", rule_restrictive_diligence_scope),
];

/// Run every catalog rule against `text`, accumulating findings in rule order.
/// A rule that panics on pathological input is skipped; the rest still run.
pub fn analyze_with_rules(text: &str) -> Vec<Finding> {
    let mut findings: Vec<Finding> = Vec::new();
    for (name, rule) in RULE_CATALOG {
        let kept = findings.len();
        let outcome = catch_unwind(AssertUnwindSafe(|| rule(text, &mut findings)));
        if outcome.is_err() {
            findings.truncate(kept);
            warn!(rule = %name, "rule panicked on this document; skipping");
        }
    }
    findings
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

pub const DEFAULT_CHUNK_CHARS: usize = 15_000;

/// Split `text` into paragraph-aligned segments of at most `max_chars`
/// characters. A single paragraph longer than the budget passes through as an
/// oversized segment. Rejoining the segments with "\n\n" reconstructs the
/// input exactly.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut segments: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_chars = 0usize;

    for para in text.split("\n\n") {
        let para_chars = para.chars().count();
        let added = if current.is_empty() {
            para_chars
        } else {
            para_chars + 2
        };
        if !current.is_empty() && current_chars + added > max_chars {
            segments.push(current.join("\n\n"));
            current.clear();
            current.push(para);
            current_chars = para_chars;
        } else {
            current.push(para);
            current_chars += added;
        }
    }
    segments.push(current.join("\n\n"));
    segments
}
