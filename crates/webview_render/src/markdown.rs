//! Markdown to styled lines, shared by markup cells and chat parts.

use std::borrow::Cow;

use ratatui::text::{Line, Span};
use tui_markdown as md;

/// Render `source` into owned lines. Never returns an empty vec for
/// non-empty input.
pub fn render_markdown_lines(source: &str) -> Vec<Line<'static>> {
    if source.is_empty() {
        return Vec::new();
    }
    let text = md::from_str(source);
    let mut lines: Vec<Line<'static>> = text.lines.iter().map(line_to_static).collect();
    while lines.last().is_some_and(is_blank) && lines.len() > 1 {
        lines.pop();
    }
    if lines.is_empty() {
        lines.push(Line::from(""));
    }
    lines
}

pub fn line_to_static(line: &Line<'_>) -> Line<'static> {
    Line {
        style: line.style,
        alignment: line.alignment,
        spans: line
            .spans
            .iter()
            .map(|span| Span {
                style: span.style,
                content: Cow::Owned(span.content.to_string()),
            })
            .collect(),
    }
}

/// Concatenated span text of each line, joined by newlines.
pub fn lines_to_plain_text(lines: &[Line<'_>]) -> String {
    lines
        .iter()
        .map(|line| {
            line.spans
                .iter()
                .map(|span| span.content.as_ref())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_blank(line: &Line<'_>) -> bool {
    line.spans.iter().all(|span| span.content.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_paragraphs_without_trailing_blank_lines() {
        let lines = render_markdown_lines("first paragraph\n\nsecond paragraph\n\n");
        let text = lines_to_plain_text(&lines);
        assert!(text.contains("first paragraph"));
        assert!(text.ends_with("second paragraph"));
    }

    #[test]
    fn empty_source_renders_nothing() {
        assert!(render_markdown_lines("").is_empty());
    }
}
