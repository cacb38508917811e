//! LLM agents: the planner and the two specialists.

pub mod planner;
pub mod qualitative;
pub mod quantitative;

pub use planner::Planner;
pub use qualitative::QualitativeAgent;
pub use quantitative::QuantitativeAgent;

/// Extract the body of the first fenced block in a model response.
///
/// Prefers a fence tagged with `language`, then any fence. Without a fence
/// the whole response is returned trimmed.
pub fn extract_fenced_block(text: &str, language: &str) -> String {
    let tagged = format!("```{}", language);

    if let Some(start) = text.find(&tagged) {
        let after = &text[start + tagged.len()..];
        // `language` may be a prefix of the actual tag (py / python)
        let body = after.split_once('\n').map(|(_, b)| b).unwrap_or(after);
        return until_closing_fence(body);
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body = after.split_once('\n').map(|(_, b)| b).unwrap_or(after);
        return until_closing_fence(body);
    }

    text.trim().to_string()
}

fn until_closing_fence(body: &str) -> String {
    let end = body.find("```").unwrap_or(body.len());
    body[..end].trim().to_string()
}
