//! Phase 0 through 6: initialization, discovery, extraction, organization,
//! update, validation, and resume.

mod phase0_init;
mod phase1_discover;
mod phase2_extract;
mod phase3_organize;
mod phase4_update;
mod phase5_validate;
mod phase6_resume;

pub use phase0_init::InitPhase;
pub use phase1_discover::DiscoverPhase;
pub use phase2_extract::ExtractPhase;
pub use phase3_organize::OrganizePhase;
pub use phase4_update::UpdatePhase;
pub use phase5_validate::{rollback, ValidatePhase, ValidationReport};
pub use phase6_resume::{ResumeDecision, ResumePhase};

/// Sanitize a topic name into a safe, bounded filename stem: strips path
/// separators and `..`, truncates to 100 chars, defaults to `unnamed` when
/// empty, and capitalizes the first letter.
pub fn sanitize_topic_name(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .replace("..", "");
    cleaned = cleaned.trim().to_string();
    if cleaned.len() > 100 {
        cleaned.truncate(100);
    }
    if cleaned.is_empty() {
        cleaned = "unnamed".to_string();
    }
    capitalize_first(&cleaned)
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
