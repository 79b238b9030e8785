use crate::contract::{severity_label, FindingSummaryFields};

pub const SUBJECT_PREFIX: &str = "GuardDuty Finding";
/// SNS rejects subjects longer than this.
pub const MAX_SUBJECT_LEN: usize = 100;

pub fn build_prompt(raw_finding: &str) -> String {
    format!(
        "You are a cloud security analyst. Summarize the following Amazon GuardDuty finding \
         for an on-call engineer. Explain what happened, which resources are affected, how \
         severe it is and what should be done next. Answer in plain text without markdown, \
         in no more than 250 words.\n\n<finding>\n{}\n</finding>",
        raw_finding.trim()
    )
}

pub fn build_email_body(
    fields: &FindingSummaryFields,
    summary: &str,
    generated_at: &str,
) -> String {
    let mut lines = vec![
        "GuardDuty Finding Summary".to_string(),
        "=========================".to_string(),
        String::new(),
        format!("Account ID: {}", fields.account),
        format!("Finding ID: {}", fields.finding_id),
        format!("Region: {}", fields.region),
        format!("Finding Type: {}", fields.finding_type),
    ];
    if let Some(score) = fields.severity {
        lines.push(format!("Severity: {} ({score})", severity_label(score)));
    }
    if let Some(title) = &fields.title {
        lines.push(format!("Title: {title}"));
    }
    if let Some(observed_at) = &fields.observed_at {
        lines.push(format!("Observed at: {observed_at}"));
    }

    lines.extend([
        String::new(),
        "Summary".to_string(),
        "-------".to_string(),
        summary.trim().to_string(),
        String::new(),
        format!("Generated at {generated_at}."),
    ]);

    lines.join("\n")
}

pub fn build_email_subject(fields: &FindingSummaryFields) -> String {
    let raw = match fields.severity {
        Some(score) => format!(
            "{SUBJECT_PREFIX} ({}): {} in {}",
            severity_label(score),
            fields.finding_type,
            fields.region
        ),
        None => format!(
            "{SUBJECT_PREFIX}: {} in {}",
            fields.finding_type, fields.region
        ),
    };
    sanitize_subject(&raw)
}

/// Restricts a subject to printable ASCII on one line and truncates it.
pub fn sanitize_subject(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = match ch {
            ' '..='~' => ch,
            '\r' | '\n' | '\t' => ' ',
            _ => '?',
        };
        if mapped == ' ' && cleaned.ends_with(' ') {
            continue;
        }
        cleaned.push(mapped);
    }

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return SUBJECT_PREFIX.to_string();
    }
    if trimmed.len() <= MAX_SUBJECT_LEN {
        return trimmed.to_string();
    }

    // ASCII only at this point, so byte slicing is safe.
    format!("{}...", trimmed[..MAX_SUBJECT_LEN - 3].trim_end())
}
