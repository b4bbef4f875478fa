use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use super::{ChatContentPart, PartContext};
use crate::chat::content::{ChatContent, ContentKind};
use crate::chat::row::DomNode;

/// Stands in for a part whose factory failed. Matches only the exact
/// content that failed, so a later change gets a fresh attempt.
pub struct ErrorContentPart {
    content: ChatContent,
    node: DomNode,
}

impl ErrorContentPart {
    pub fn new(content: ChatContent, error: &anyhow::Error) -> Self {
        let line = Line::from(vec![
            Span::styled("✗ ", Style::default().fg(Color::LightRed)),
            Span::styled(
                format!("Failed to render {:?} content: {error}", content.kind()),
                Style::default().fg(Color::LightRed),
            ),
        ]);
        Self {
            content,
            node: DomNode::new(vec![line]),
        }
    }
}

impl ChatContentPart for ErrorContentPart {
    fn kind(&self) -> ContentKind {
        self.content.kind()
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
        *content == self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_identical_content() {
        let context = PartContext {
            element_id: "r1",
            is_complete: false,
            code_block_start_index: 0,
        };
        let part = ErrorContentPart::new(
            ChatContent::markdown("bad"),
            &anyhow::anyhow!("factory exploded"),
        );
        assert!(part.dom_node().unwrap().lines[0]
            .to_string()
            .contains("factory exploded"));
        assert!(part.has_same_content(&ChatContent::markdown("bad"), &[], &context));
        assert!(!part.has_same_content(&ChatContent::markdown("better"), &[], &context));
    }
}
