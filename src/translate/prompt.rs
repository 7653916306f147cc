//! Prompt construction shared by the provider adapters.

/// Instructions sent as the system prompt; the document itself is the user turn.
pub(crate) fn system_prompt(target_language: &str) -> String {
    format!(
        "You are a translator. Translate the user's markdown document into {target_language}. \
         Keep the markdown structure intact: headings, lists, tables, links and images. \
         Do not translate code blocks, inline code, URLs, or diagram sources such as mermaid blocks. \
         Output only the translated document, nothing else."
    )
}

/// Rough output budget: ~3 bytes per token of input plus 15% headroom,
/// clamped to [256, 8192].
pub(crate) fn estimate_max_tokens(text: &str) -> u32 {
    let estimated_input_tokens = text.len() as f64 / 3.0;
    let max = (estimated_input_tokens * 1.15 + 64.0) as u32;
    max.clamp(256, 8192)
}
