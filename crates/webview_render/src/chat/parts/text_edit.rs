//! Inline diff for an edit group, with line-number gutter and coloured
//! insert/delete lines.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use similar::{ChangeTag, TextDiff};
use unicode_width::UnicodeWidthChar;

use super::{ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::content::{ChatContent, ContentKind, TextEditGroup};
use crate::chat::row::DomNode;

/// Unchanged lines kept around each hunk.
const CONTEXT_LINES: usize = 2;

pub struct TextEditPartFactory;

impl ContentPartFactory for TextEditPartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[ContentKind::TextEditGroup]
    }

    fn create(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let ChatContent::TextEditGroup(group) = content else {
            anyhow::bail!("text edit part cannot render {:?}", content.kind());
        };
        Ok(Box::new(TextEditPart::new(group.clone())))
    }
}

pub struct TextEditPart {
    group: TextEditGroup,
    node: DomNode,
}

impl TextEditPart {
    pub fn new(group: TextEditGroup) -> Self {
        let mut lines = vec![Line::from(vec![
            Span::styled(
                if group.done { "✓ " } else { "⋯ " },
                Style::default().fg(if group.done { Color::Green } else { Color::Yellow }),
            ),
            Span::styled(
                group.uri.clone(),
                Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
            ),
        ])];
        let diff = generate_diff_lines(&group.original, &group.modified);
        render_diff_lines(&diff, &mut lines);
        Self {
            node: DomNode::new(lines),
            group,
        }
    }
}

impl ChatContentPart for TextEditPart {
    fn kind(&self) -> ContentKind {
        ContentKind::TextEditGroup
    }

    fn dom_node(&self) -> Option<&DomNode> {
        Some(&self.node)
    }

    fn has_same_content(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> bool {
        matches!(content, ChatContent::TextEditGroup(other) if *other == self.group)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context { line_num: usize, text: String },
    Insert { line_num: usize, text: String },
    Delete { line_num: usize, text: String },
    HunkSeparator,
}

/// Hunks of changed lines between `old_text` and `new_text`.
pub fn generate_diff_lines(old_text: &str, new_text: &str) -> Vec<DiffLine> {
    let diff = TextDiff::configure()
        .newline_terminated(true)
        .diff_lines(old_text, new_text);

    let mut lines = Vec::new();
    for (hunk_idx, group) in diff.grouped_ops(CONTEXT_LINES).iter().enumerate() {
        if hunk_idx > 0 {
            lines.push(DiffLine::HunkSeparator);
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let text = change.value().trim_end_matches('\n').to_string();
                let line = match change.tag() {
                    ChangeTag::Equal => DiffLine::Context {
                        line_num: change.new_index().map_or(0, |i| i + 1),
                        text,
                    },
                    ChangeTag::Delete => DiffLine::Delete {
                        line_num: change.old_index().map_or(0, |i| i + 1),
                        text,
                    },
                    ChangeTag::Insert => DiffLine::Insert {
                        line_num: change.new_index().map_or(0, |i| i + 1),
                        text,
                    },
                };
                lines.push(line);
            }
        }
    }
    lines
}

fn render_diff_lines(diff_lines: &[DiffLine], lines: &mut Vec<Line<'static>>) {
    let gutter_width = diff_lines
        .iter()
        .filter_map(|line| match line {
            DiffLine::Context { line_num, .. }
            | DiffLine::Insert { line_num, .. }
            | DiffLine::Delete { line_num, .. } => Some(*line_num),
            DiffLine::HunkSeparator => None,
        })
        .max()
        .map_or(1, |max| max.to_string().len());
    let gutter = |line_num: usize| {
        Span::styled(
            format!("  {line_num:>gutter_width$} "),
            Style::default().add_modifier(Modifier::DIM),
        )
    };

    for diff_line in diff_lines {
        let line = match diff_line {
            DiffLine::HunkSeparator => Line::from(vec![
                Span::raw(format!("  {:gutter_width$} ", "")),
                Span::styled("⋮", Style::default().add_modifier(Modifier::DIM)),
            ]),
            DiffLine::Context { line_num, text } => Line::from(vec![
                gutter(*line_num),
                Span::styled(format!(" {}", expand_tabs(text)), Style::default().fg(Color::Gray)),
            ]),
            DiffLine::Insert { line_num, text } => Line::from(vec![
                gutter(*line_num),
                Span::styled(format!("+{}", expand_tabs(text)), Style::default().fg(Color::Green)),
            ]),
            DiffLine::Delete { line_num, text } => Line::from(vec![
                gutter(*line_num),
                Span::styled(format!("-{}", expand_tabs(text)), Style::default().fg(Color::Red)),
            ]),
        };
        lines.push(line);
    }
}

fn expand_tabs(text: &str) -> String {
    if !text.contains('\t') {
        return text.to_string();
    }
    let mut result = String::with_capacity(text.len());
    let mut column = 0;
    for ch in text.chars() {
        if ch == '\t' {
            let spaces = 4 - (column % 4);
            result.extend(std::iter::repeat(' ').take(spaces));
            column += spaces;
        } else {
            result.push(ch);
            column += ch.width().unwrap_or(0);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_line_change() {
        let lines = generate_diff_lines("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            lines,
            vec![
                DiffLine::Context { line_num: 1, text: "a".into() },
                DiffLine::Delete { line_num: 2, text: "b".into() },
                DiffLine::Insert { line_num: 2, text: "B".into() },
                DiffLine::Context { line_num: 3, text: "c".into() },
            ]
        );
    }

    #[test]
    fn distant_changes_are_split_into_hunks() {
        let old: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 2\n", "line two\n").replace("line 19\n", "line nineteen\n");
        let lines = generate_diff_lines(&old, &new);
        assert_eq!(
            lines.iter().filter(|line| **line == DiffLine::HunkSeparator).count(),
            1
        );
    }

    #[test]
    fn tabs_expand_to_four_columns() {
        assert_eq!(expand_tabs("\tx"), "    x");
        assert_eq!(expand_tabs("ab\tx"), "ab  x");
    }

    #[test]
    fn part_header_and_identity() {
        let group = TextEditGroup {
            uri: "src/lib.rs".into(),
            original: "a\n".into(),
            modified: "b\n".into(),
            done: true,
            from_tool: false,
        };
        let part = TextEditPart::new(group.clone());
        let node = part.dom_node().unwrap();
        assert_eq!(node.lines[0].to_string(), "✓ src/lib.rs");
        assert_eq!(node.height(), 3);

        let context = PartContext {
            element_id: "r1",
            is_complete: true,
            code_block_start_index: 0,
        };
        let mut pending = group.clone();
        pending.done = false;
        assert!(part.has_same_content(&ChatContent::TextEditGroup(group), &[], &context));
        assert!(!part.has_same_content(&ChatContent::TextEditGroup(pending), &[], &context));
    }
}
