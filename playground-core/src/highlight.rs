//! Keyword highlighting for Lox source.

use crate::editor::{offset_to_position, Decoration, DecorationKind, Span};
use once_cell::sync::Lazy;
use regex::Regex;

static KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(fun|print|or|and)\b").expect("valid keyword regex"));

/// Decoration class for a highlighted keyword
pub fn keyword_class(keyword: &str) -> &'static str {
    match keyword {
        "fun" => "fun",
        "print" => "print",
        _ => "keyword",
    }
}

/// Mark decorations for every highlighted keyword in `text`, in document order
pub fn keyword_marks(text: &str) -> Vec<Decoration> {
    KEYWORD_RE
        .find_iter(text)
        .map(|m| {
            let (start_line, start_col) = offset_to_position(text, m.start());
            let (end_line, end_col) = offset_to_position(text, m.end());
            Decoration {
                kind: DecorationKind::Mark,
                span: Span::new(start_line, start_col, end_line, end_col),
                from: m.start(),
                to: m.end(),
                class: keyword_class(m.as_str()).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_marks() {
        let marks = keyword_marks("fun f(a) {\n  print a or b;\n}");
        let classes: Vec<&str> = marks.iter().map(|m| m.class.as_str()).collect();
        assert_eq!(classes, vec!["fun", "print", "keyword"]);

        assert_eq!(marks[1].span, Span::new(2, 3, 2, 8));
        assert_eq!(&"fun f(a) {\n  print a or b;\n}"[marks[1].from..marks[1].to], "print");
    }

    #[test]
    fn test_keywords_inside_identifiers_are_ignored() {
        assert!(keyword_marks("var fungus = printer + order + android;").is_empty());
    }
}
