use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use super::{ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::content::{ChatContent, ContentKind, ContentReference};
use crate::chat::row::DomNode;

pub struct ReferencesPartFactory;

impl ContentPartFactory for ReferencesPartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[ContentKind::References]
    }

    fn create(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let ChatContent::References { references } = content else {
            anyhow::bail!("references part cannot render {:?}", content.kind());
        };
        Ok(Box::new(ReferencesPart::new(references, !following.is_empty())))
    }
}

/// Collapsible list of references. Expanded by default only when nothing
/// follows it in the row.
pub struct ReferencesPart {
    count: usize,
    has_following_content: bool,
    node: DomNode,
}

impl ReferencesPart {
    pub fn new(references: &[ContentReference], has_following_content: bool) -> Self {
        let expanded = !has_following_content;
        let noun = if references.len() == 1 { "reference" } else { "references" };
        let marker = if expanded { "▾" } else { "▸" };
        let mut lines = vec![Line::from(vec![
            Span::styled(format!("{marker} "), Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("Used {} {noun}", references.len()),
                Style::default().fg(Color::Gray),
            ),
        ])];
        if expanded {
            lines.extend(references.iter().map(|reference| {
                let label = reference.title.as_deref().unwrap_or(&reference.uri);
                Line::from(vec![
                    Span::raw("  "),
                    Span::styled(label.to_string(), Style::default().fg(Color::Cyan)),
                ])
            }));
        }

        Self {
            count: references.len(),
            has_following_content,
            node: DomNode::new(lines),
        }
    }
}

impl ChatContentPart for ReferencesPart {
    fn kind(&self) -> ContentKind {
        ContentKind::References
    }

    fn dom_node(&self) -> Option<&DomNode> {
        Some(&self.node)
    }

    fn has_same_content(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> bool {
        matches!(content, ChatContent::References { references } if references.len() == self.count)
            && following.is_empty() != self.has_following_content
    }
}
