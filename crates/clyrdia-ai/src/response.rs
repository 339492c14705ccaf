//! Reading model output.
//!
//! The model is asked for JSON but routinely wraps it in prose or code
//! fences, so the payload is taken from the first `{` to the last `}`.
//! Unreadable analysis output never fails the caller: it becomes a degraded
//! payload.

use chrono::Utc;
use clyrdia_core::analysis::clamp_score;
use clyrdia_core::{FixValidation, Issue, IssueType, RiskLevel};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub const DEGRADED_RECOMMENDATION: &str = "Review the contract manually for detailed analysis";
pub const DEGRADED_SUMMARY: &str = "AI analysis completed but response parsing failed";
const DEFAULT_SUMMARY: &str = "Analysis completed";
const DEFAULT_SCORE: f64 = 50.0;

/// Structured analysis extracted from a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPayload {
    pub overall_risk: RiskLevel,
    pub overall_risk_score: f64,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub summary: String,
    /// True when the response could not be parsed.
    pub degraded: bool,
}

impl AnalysisPayload {
    pub fn degraded() -> Self {
        Self {
            overall_risk: RiskLevel::Medium,
            overall_risk_score: DEFAULT_SCORE,
            issues: Vec::new(),
            recommendations: vec![DEGRADED_RECOMMENDATION.to_string()],
            summary: DEGRADED_SUMMARY.to_string(),
            degraded: true,
        }
    }
}

/// The slice from the first `{` to the last `}`, if any.
pub fn json_span(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

fn json_object(response: &str) -> Option<serde_json::Map<String, Value>> {
    let span = json_span(response)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "model response is not valid JSON");
            None
        }
    }
}

/// Parse an accumulated analysis response, degrading on failure.
pub fn parse_analysis(response: &str) -> AnalysisPayload {
    let Some(map) = json_object(response) else {
        warn!(chars = response.chars().count(), "falling back to degraded analysis");
        return AnalysisPayload::degraded();
    };

    let issues = match map.get("issues") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_issue).collect(),
        _ => Vec::new(),
    };

    AnalysisPayload {
        overall_risk: map
            .get("overall_risk")
            .and_then(Value::as_str)
            .map(RiskLevel::from_label)
            .unwrap_or(RiskLevel::Medium),
        overall_risk_score: score(map.get("overall_risk_score")),
        issues,
        recommendations: strings(map.get("recommendations")),
        summary: map
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SUMMARY)
            .to_string(),
        degraded: false,
    }
}

fn parse_issue(value: &Value) -> Option<Issue> {
    let obj = value.as_object()?;
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    Some(Issue {
        id: Uuid::new_v4().to_string(),
        issue_type: text("type")
            .or_else(|| text("issue_type"))
            .map(|t| IssueType::from_label(&t))
            .unwrap_or(IssueType::Other),
        severity: text("severity")
            .map(|s| RiskLevel::from_label(&s))
            .unwrap_or(RiskLevel::Medium),
        title: text("title").unwrap_or_else(|| "Untitled issue".to_string()),
        description: text("description").unwrap_or_default(),
        line_number: obj
            .get("line_number")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        clause_reference: text("clause_reference"),
        suggested_fix: text("suggested_fix").unwrap_or_default(),
        risk_score: score(obj.get("risk_score")),
        confidence: score(obj.get("confidence")),
        created_at: Utc::now(),
    })
}

/// Numeric score in `[0, 100]`. Accepts numbers and numeric strings.
fn score(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    clamp_score(raw.unwrap_or(DEFAULT_SCORE), DEFAULT_SCORE)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse a fix-validation verdict, rejecting when unreadable.
pub fn parse_fix_validation(response: &str) -> FixValidation {
    let Some(map) = json_object(response) else {
        return FixValidation::rejected("Failed to parse validation response");
    };
    FixValidation {
        is_valid: map.get("is_valid").and_then(Value::as_bool).unwrap_or(false),
        confidence: clamp_score(
            map.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
            0.0,
        ),
        issues: strings(map.get("issues")),
        improvements: strings(map.get("improvements")),
        recommendation: map
            .get("recommendation")
            .and_then(Value::as_str)
            .unwrap_or("reject")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_payload() {
        let payload = parse_analysis(
            r#"{"overall_risk":"low","overall_risk_score":10,"issues":[],"recommendations":[],"summary":"ok"}"#,
        );
        assert_eq!(payload.overall_risk, RiskLevel::Low);
        assert_eq!(payload.overall_risk_score, 10.0);
        assert!(payload.issues.is_empty());
        assert_eq!(payload.summary, "ok");
        assert!(!payload.degraded);
    }

    #[test]
    fn strips_surrounding_prose_and_fences() {
        let payload = parse_analysis(
            "Here is the analysis:\n```json\n{\"overall_risk\":\"high\",\"overall_risk_score\":80,\"summary\":\"risky\"}\n```\nThanks.",
        );
        assert_eq!(payload.overall_risk, RiskLevel::High);
        assert_eq!(payload.summary, "risky");
    }

    #[test]
    fn unparsable_response_degrades() {
        let payload = parse_analysis("I could not analyse this {contract");
        assert!(payload.degraded);
        assert_eq!(payload.overall_risk, RiskLevel::Medium);
        assert_eq!(payload.overall_risk_score, 50.0);
        assert!(payload.issues.is_empty());
        assert_eq!(payload.recommendations, vec![DEGRADED_RECOMMENDATION]);
        assert_eq!(payload.summary, DEGRADED_SUMMARY);
    }

    #[test]
    fn malformed_json_between_braces_degrades() {
        assert!(parse_analysis("{ not json }").degraded);
    }

    #[test]
    fn issues_are_normalised() {
        let payload = parse_analysis(
            r#"{"overall_risk":"critical","overall_risk_score":"140","issues":[
                {"type":"Financial","severity":"HIGH","title":"Late fees","description":"5% monthly","suggested_fix":"Cap at 1%","risk_score":75,"confidence":180},
                {"type":"tax","title":"Unclear tax"},
                "not an object"
            ],"recommendations":["Negotiate", 3],"summary":"s"}"#,
        );
        assert_eq!(payload.overall_risk, RiskLevel::Critical);
        assert_eq!(payload.overall_risk_score, 100.0);
        assert_eq!(payload.issues.len(), 2);

        let first = &payload.issues[0];
        assert_eq!(first.issue_type, IssueType::Financial);
        assert_eq!(first.severity, RiskLevel::High);
        assert_eq!(first.risk_score, 75.0);
        assert_eq!(first.confidence, 100.0);

        let second = &payload.issues[1];
        assert_eq!(second.issue_type, IssueType::Other);
        assert_eq!(second.severity, RiskLevel::Medium);
        assert_eq!(second.risk_score, 50.0);
        assert_ne!(first.id, second.id);

        assert_eq!(payload.recommendations, vec!["Negotiate"]);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let payload = parse_analysis("{}");
        assert!(!payload.degraded);
        assert_eq!(payload.overall_risk, RiskLevel::Medium);
        assert_eq!(payload.overall_risk_score, 50.0);
        assert_eq!(payload.summary, "Analysis completed");
    }

    #[test]
    fn json_span_requires_ordered_braces() {
        assert_eq!(json_span("} before {"), None);
        assert_eq!(json_span("x {a} y"), Some("{a}"));
    }

    #[test]
    fn fix_validation_parse_and_fallback() {
        let ok = parse_fix_validation(
            r#"{"is_valid":true,"confidence":85,"issues":[],"improvements":["clearer cap"],"recommendation":"accept"}"#,
        );
        assert!(ok.is_valid);
        assert_eq!(ok.confidence, 85.0);
        assert_eq!(ok.recommendation, "accept");

        let bad = parse_fix_validation("looks fine to me");
        assert!(!bad.is_valid);
        assert_eq!(bad.issues, vec!["Failed to parse validation response"]);
    }
}
