//! Prompt construction for analysis, fix suggestion, and fix validation.

use clyrdia_core::Industry;
use clyrdia_core::text::truncate_chars;

use crate::model::ModelRequest;

/// Characters of contract text embedded in an analysis prompt.
pub const ANALYSIS_CONTEXT_CHARS: usize = 8000;

/// Characters of contract context embedded in a fix-suggestion prompt.
pub const FIX_CONTEXT_CHARS: usize = 2000;

pub const FIX_SUGGESTION_MAX_TOKENS: u32 = 1000;
pub const FIX_VALIDATION_MAX_TOKENS: u32 = 800;
pub const ADVICE_TEMPERATURE: f32 = 0.1;

const ANALYSIS_SYSTEM: &str = "You are a legal contract analysis expert. Analyze contracts for legal, financial, compliance, and operational risks. Provide detailed, actionable insights.";

const FIX_SUGGESTION_SYSTEM: &str = "You are a legal contract expert. Provide specific, actionable fix suggestions for contract issues.";

const FIX_VALIDATION_SYSTEM: &str = "You are a legal contract validation expert. Evaluate proposed fixes for legal compliance and effectiveness.";

const ANALYSIS_FORMAT: &str = r#"Format your response as JSON with the following structure:
{
  "overall_risk": "low/medium/high/critical",
  "overall_risk_score": 0-100,
  "issues": [
    {
      "type": "legal/financial/compliance/operational/security/other",
      "severity": "low/medium/high/critical",
      "title": "issue_title",
      "description": "detailed_description",
      "suggested_fix": "fix_description",
      "clause_reference": "optional clause reference",
      "risk_score": 0-100,
      "confidence": 0-100
    }
  ],
  "recommendations": ["rec1", "rec2"],
  "summary": "analysis_summary"
}"#;

const VALIDATION_FORMAT: &str = r#"Return JSON:
{
  "is_valid": true/false,
  "confidence": 0-100,
  "issues": ["any_issues_found"],
  "improvements": ["improvements_made"],
  "recommendation": "accept/reject/modify"
}"#;

/// User prompt for a full contract analysis.
pub fn analysis_prompt(text: &str, industry: Option<Industry>, analysis_types: &[String]) -> String {
    let industry = industry.map(|i| i.as_str()).unwrap_or("General");
    format!(
        "Please analyze the following contract for potential issues and risks.\n\n\
         Contract Text:\n{text}\n\n\
         Industry Context: {industry}\n\
         Analysis Focus: {focus}\n\n\
         Please provide a comprehensive analysis including:\n\
         1. Overall risk assessment (low/medium/high/critical)\n\
         2. Specific issues found, each with type, severity, risk score (0-100), description, and suggested fix\n\
         3. General recommendations\n\
         4. Summary of findings\n\n\
         {ANALYSIS_FORMAT}\n",
        text = truncate_chars(text, ANALYSIS_CONTEXT_CHARS),
        focus = analysis_types.join(", "),
    )
}

pub fn analysis_request(
    text: &str,
    industry: Option<Industry>,
    analysis_types: &[String],
    max_tokens: u32,
    temperature: f32,
) -> ModelRequest {
    ModelRequest {
        system: ANALYSIS_SYSTEM.to_string(),
        user: analysis_prompt(text, industry, analysis_types),
        max_tokens,
        temperature,
    }
}

pub fn fix_suggestion_request(issue_description: &str, contract_context: &str) -> ModelRequest {
    ModelRequest {
        system: FIX_SUGGESTION_SYSTEM.to_string(),
        user: format!(
            "Given this contract issue:\n{issue_description}\n\n\
             And this contract context:\n{context}\n\n\
             Please provide a specific, actionable fix suggestion. Be precise and legal-compliant.",
            context = truncate_chars(contract_context, FIX_CONTEXT_CHARS),
        ),
        max_tokens: FIX_SUGGESTION_MAX_TOKENS,
        temperature: ADVICE_TEMPERATURE,
    }
}

pub fn fix_validation_request(
    original_text: &str,
    proposed_fix: &str,
    issue_description: &str,
) -> ModelRequest {
    ModelRequest {
        system: FIX_VALIDATION_SYSTEM.to_string(),
        user: format!(
            "Please validate this proposed fix for a contract.\n\n\
             Issue:\n{issue_description}\n\n\
             Original Text:\n{original_text}\n\n\
             Proposed Fix:\n{proposed_fix}\n\n\
             Evaluate the fix for legal compliance, clarity, potential new issues, and overall improvement.\n\n\
             {VALIDATION_FORMAT}\n"
        ),
        max_tokens: FIX_VALIDATION_MAX_TOKENS,
        temperature: ADVICE_TEMPERATURE,
    }
}
