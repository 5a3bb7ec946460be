// src/utils/html.rs

use ammonia::Builder;

/// Sanitizes rich text entered by admins (quiz and class descriptions).
///
/// Whitelist based: harmless formatting tags such as <b> or <p> survive,
/// <script>, <iframe> and event-handler attributes are removed.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Removes every tag, keeping only the text. Used for model output and
/// question text, which are never rendered as markup.
///
/// The result is HTML-safe: `<`, `>` and `&` come back as entities.
pub fn clean_plain_text(input: &str) -> String {
    Builder::empty().clean(input).to_string().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_dropped_formatting_kept() {
        let cleaned = clean_html("<p>Hello <b>there</b><script>alert(1)</script></p>");
        assert_eq!(cleaned, "<p>Hello <b>there</b></p>");
    }

    #[test]
    fn plain_text_has_no_tags() {
        assert_eq!(clean_plain_text("  <i>What</i> is <b>Rust</b>? "), "What is Rust?");
    }
}
