use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use super::{ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::content::{ChatContent, ContentKind};
use crate::chat::row::DomNode;

pub struct ProgressPartFactory;

impl ContentPartFactory for ProgressPartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[ContentKind::ProgressTask]
    }

    fn create(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let ChatContent::ProgressTask {
            content, settled, ..
        } = content
        else {
            anyhow::bail!("progress part cannot render {:?}", content.kind());
        };
        Ok(Box::new(ProgressPart {
            node: DomNode::new(vec![progress_line(content, *settled)]),
            text: content.clone(),
            settled: *settled,
        }))
    }
}

/// A progress message. Matches any progress task in the same settled
/// state; text changes are applied in place.
pub struct ProgressPart {
    text: String,
    settled: bool,
    node: DomNode,
}

impl ChatContentPart for ProgressPart {
    fn kind(&self) -> ContentKind {
        ContentKind::ProgressTask
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
        matches!(content, ChatContent::ProgressTask { settled, .. } if *settled == self.settled)
    }

    fn refresh(&mut self, content: &ChatContent) -> bool {
        match content {
            ChatContent::ProgressTask { content, .. } if *content != self.text => {
                self.text = content.clone();
                self.node.lines = vec![progress_line(&self.text, self.settled)];
                true
            }
            _ => false,
        }
    }
}

fn progress_line(text: &str, settled: bool) -> Line<'static> {
    let (marker, color) = if settled {
        ("✓ ", Color::DarkGray)
    } else {
        ("⋯ ", Color::Yellow)
    };
    Line::from(vec![
        Span::styled(marker, Style::default().fg(color)),
        Span::styled(text.to_string(), Style::default().fg(Color::Gray)),
    ])
}
