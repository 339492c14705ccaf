//! Terminal rendering of an analysis as a vertical card.

use std::fmt::Write;

use clyrdia_core::{AnalysisRecord, Issue};

const MAX_LIST_ITEMS: usize = 10;
const LABEL_WIDTH: usize = 26;
const TITLE_WIDTH: usize = 60;

// ── Public API ──

/// Print a single analysis as a vertical card grouped by section.
pub fn print_analysis_card(record: &AnalysisRecord) {
    print!("{}", render_analysis_card(record));
}

pub fn render_analysis_card(record: &AnalysisRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", record.id);
    if !record.summary.is_empty() {
        let _ = writeln!(out, "{}", record.summary);
    }
    out.push('\n');

    let meta = &record.metadata;
    section(
        &mut out,
        "Identity",
        &[
            ("analysis_id", Some(record.id.clone())),
            ("contract_hash", Some(record.fingerprint.clone())),
            (
                "created_at",
                Some(record.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ),
            ("processing_time", Some(format!("{:.2}s", record.processing_time))),
        ],
    );
    section(
        &mut out,
        "Risk",
        &[
            ("risk_level", Some(record.risk_level.to_string())),
            (
                "overall_risk_score",
                Some(format!("{:.1}", record.overall_risk_score)),
            ),
            ("total_issues", Some(record.total_issues.to_string())),
            (
                "worst_severity",
                record.worst_severity().map(|s| s.to_string()),
            ),
        ],
    );
    section(
        &mut out,
        "Context",
        &[
            ("industry", meta.industry.map(|i| i.to_string())),
            (
                "analysis_types",
                Some(meta.analysis_types.join(", ")).filter(|s| !s.is_empty()),
            ),
            ("text_length", Some(meta.text_length.to_string())),
            ("model_used", Some(meta.model_used.clone())),
            ("degraded", meta.degraded.then(|| "yes".to_string())),
            ("reanalysis_of", meta.reanalysis_of.clone()),
        ],
    );

    if !record.issues.is_empty() {
        let _ = writeln!(out, "Issues ({}):", record.issues.len());
        for issue in record.issues.iter().take(MAX_LIST_ITEMS) {
            issue_line(&mut out, issue);
        }
        more(&mut out, record.issues.len());
        out.push('\n');
    }

    if !record.recommendations.is_empty() {
        let _ = writeln!(out, "Recommendations");
        for rec in record.recommendations.iter().take(MAX_LIST_ITEMS) {
            let _ = writeln!(out, "  - {rec}");
        }
        more(&mut out, record.recommendations.len());
        out.push('\n');
    }

    out
}

// ── Section rendering ──

fn section(out: &mut String, header: &str, rows: &[(&str, Option<String>)]) {
    if rows.iter().all(|(_, v)| v.is_none()) {
        return;
    }
    let _ = writeln!(out, "{header}");
    for (label, value) in rows {
        if let Some(v) = value {
            let _ = writeln!(out, "  {label:<LABEL_WIDTH$} {v}");
        }
    }
    out.push('\n');
}

fn issue_line(out: &mut String, issue: &Issue) {
    let _ = write!(
        out,
        "    [{:<8}] {:<12}",
        issue.severity.as_str(),
        issue.issue_type.as_str()
    );
    let _ = write!(out, "  risk {:.0}", issue.risk_score);
    if let Some(clause) = &issue.clause_reference {
        let _ = write!(out, "  clause: {clause}");
    }
    if let Some(line) = issue.line_number {
        let _ = write!(out, "  line: {line}");
    }
    out.push('\n');
    let _ = writeln!(out, "      {}", shorten(&issue.title, TITLE_WIDTH));
}

fn more(out: &mut String, len: usize) {
    if len > MAX_LIST_ITEMS {
        let _ = writeln!(out, "    ... and {} more", len - MAX_LIST_ITEMS);
    }
}

fn shorten(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
