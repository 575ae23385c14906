//! Instructions sent to the vision model with every page.
//!
//! Callers can override the default via [`crate::config::OcrConfig::system_prompt`];
//! the constants here are used only when no override is provided.

/// Default system prompt for transcribing a page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe ALL text visible in the page image.

Rules:
1. Preserve the reading order a human would follow, including multi-column layouts.
2. Keep paragraphs, line breaks inside addresses and lists, and list markers.
3. Render tables as rows of cells separated by " | ", one row per line.
4. Keep numbers, dates, amounts and punctuation exactly as printed.
5. If a word is illegible, write [illegible] instead of guessing.
6. Do NOT describe images, logos or layout; do NOT add commentary.
7. Output ONLY the transcribed text, with no code fences and no preamble."#;

/// User-turn text accompanying the image.
pub const PAGE_INSTRUCTION: &str = "Extract all text from this page.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_forbids_fences_and_commentary() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("no code fences"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("commentary"));
    }

    #[test]
    fn instruction_is_not_empty() {
        assert!(!PAGE_INSTRUCTION.trim().is_empty());
    }
}
