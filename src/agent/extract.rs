use super::FinalOutput;

/// Pick the answer text of a run.
///
/// Order: the final output (text verbatim, the text field of structured
/// output, JSON of anything else), then the accumulated streamed fragments,
/// then the whole run rendered as text. An empty final output falls through.
pub fn extract_answer(
    final_output: Option<&FinalOutput>,
    accumulated: &str,
    raw: &serde_json::Value,
) -> String {
    let from_final = match final_output {
        Some(FinalOutput::Text(text)) => text.clone(),
        Some(FinalOutput::Structured { text_content, .. }) => text_content.clone(),
        Some(FinalOutput::Opaque(value)) => render(value),
        None => String::new(),
    };

    if !from_final.is_empty() {
        return from_final;
    }
    if !accumulated.is_empty() {
        return accumulated.to_string();
    }
    render(raw)
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
