//! Label sanitizing for identifiers that end up in paths and file names.
//!
//! Only ASCII letters, ASCII digits and `_` survive. Everything else, including
//! `-`, whitespace, path separators and non-ASCII letters, is dropped.

/// Characters allowed in a sanitized label.
pub fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Strip every character outside `[A-Za-z0-9_]`.
pub fn sanitize_label(text: &str) -> String {
    text.chars().filter(|c| is_label_char(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_space() {
        assert_eq!(sanitize_label("Hello World"), "HelloWorld");
        assert_eq!(sanitize_label("Some Name"), "SomeName");
    }

    #[test]
    fn test_keeps_underscore_and_digits() {
        assert_eq!(sanitize_label("Hello_World_42"), "Hello_World_42");
    }

    #[test]
    fn test_remove_separators() {
        assert_eq!(sanitize_label("Hello\\World"), "HelloWorld");
        assert_eq!(sanitize_label("epoc/33"), "epoc33");
    }

    #[test]
    fn test_removes_dash() {
        assert_eq!(sanitize_label("Hello-World"), "HelloWorld");
    }

    #[test]
    fn test_special_characters() {
        assert_eq!(sanitize_label("Hello!@#$%^&*()_+World"), "Hello_World");
        assert_eq!(sanitize_label("Müller"), "Mller");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_label(""), "");
    }

    #[test]
    fn test_idempotent() {
        for input in ["", "Some Name", "epoc/33", "a-b_c d", "ÅÄÖ 123", "___"] {
            let once = sanitize_label(input);
            assert_eq!(sanitize_label(&once), once);
            assert!(once.chars().all(is_label_char));
        }
    }
}
