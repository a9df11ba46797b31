//! System prompts for the vision-LLM converters.
//!
//! Callers can override the PDF prompt via
//! [`crate::config::VisionConfig::system_prompt`]; the image prompt is fixed.

/// Default system prompt for converting one rendered PDF page to Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert document converter. Convert the page image to clean, well-structured Markdown.

1. TEXT
   - Preserve ALL text content in human reading order
   - Fix obvious recognition errors only when completely certain

2. STRUCTURE
   - # for the page title (at most one), ## / ### / #### for sections
   - - for unordered lists, 1. 2. 3. for ordered lists, nesting by indentation
   - **bold** and *italic* matching the visual emphasis

3. TABLES
   - GFM pipe tables with alignment markers; HTML only when pipes cannot express it

4. CODE AND FORMULAS
   - Fenced code blocks with a language tag, inline code in single backticks
   - LaTeX for math: $inline$ and $$display$$

5. IGNORE
   - Page numbers, running headers and footers, decorative rules

6. OUTPUT
   - Output ONLY the Markdown content, starting with the page content
   - Do NOT wrap the answer in ```markdown fences
   - Do NOT add commentary"#;

/// System prompt for transcribing a standalone image.
pub const IMAGE_SYSTEM_PROMPT: &str = r#"You are an expert at reading images. Transcribe every piece of legible text in the image to Markdown, keeping headings, lists and tables as structure.

If the image contains little or no text, write one or two sentences describing what it shows instead.

Output ONLY the Markdown. Do NOT wrap it in ```markdown fences and do NOT add commentary."#;

/// The PDF prompt, honouring an override.
pub fn pdf_prompt(custom: Option<&str>) -> &str {
    custom.unwrap_or(DEFAULT_SYSTEM_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins() {
        assert_eq!(pdf_prompt(Some("just text")), "just text");
        assert!(pdf_prompt(None).starts_with("You are an expert document converter"));
    }

    #[test]
    fn prompts_forbid_fences() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Do NOT wrap"));
        assert!(IMAGE_SYSTEM_PROMPT.contains("Do NOT wrap"));
    }
}
