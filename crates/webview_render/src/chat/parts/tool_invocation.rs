use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use super::{status_color, ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::content::{ChatContent, ContentKind, ToolInvocation, ToolStatus};
use crate::chat::row::DomNode;

/// Tool output lines shown under the header before truncating.
const MAX_OUTPUT_LINES: usize = 5;

pub struct ToolInvocationPartFactory;

impl ContentPartFactory for ToolInvocationPartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[ContentKind::ToolInvocation]
    }

    fn create(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let ChatContent::ToolInvocation(invocation) = content else {
            anyhow::bail!("tool invocation part cannot render {:?}", content.kind());
        };
        Ok(Box::new(ToolInvocationPart::new(invocation.clone())))
    }
}

/// One tool call. Keeps its node across status changes of the same call.
pub struct ToolInvocationPart {
    invocation: ToolInvocation,
    node: Option<DomNode>,
}

impl ToolInvocationPart {
    pub fn new(invocation: ToolInvocation) -> Self {
        let node = (!invocation.is_hidden).then(|| DomNode::new(tool_lines(&invocation)));
        Self { invocation, node }
    }
}

impl ChatContentPart for ToolInvocationPart {
    fn kind(&self) -> ContentKind {
        ContentKind::ToolInvocation
    }

    fn dom_node(&self) -> Option<&DomNode> {
        self.node.as_ref()
    }

    fn has_same_content(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> bool {
        matches!(
            content,
            ChatContent::ToolInvocation(other)
                if other.id == self.invocation.id && other.is_hidden == self.invocation.is_hidden
        )
    }

    fn refresh(&mut self, content: &ChatContent) -> bool {
        let ChatContent::ToolInvocation(invocation) = content else {
            return false;
        };
        if *invocation == self.invocation {
            return false;
        }
        self.invocation = invocation.clone();
        let Some(node) = self.node.as_mut() else {
            return false;
        };
        node.lines = tool_lines(&self.invocation);
        true
    }
}

fn tool_header_line(invocation: &ToolInvocation) -> Line<'static> {
    let mut spans = vec![
        Span::styled("● ", Style::default().fg(status_color(invocation.status))),
        Span::styled(
            invocation.tool_name.clone(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if !invocation.message.is_empty() {
        spans.push(Span::styled(
            format!(" {}", invocation.message),
            Style::default().fg(Color::Gray),
        ));
    }
    Line::from(spans)
}

fn tool_lines(invocation: &ToolInvocation) -> Vec<Line<'static>> {
    let mut lines = vec![tool_header_line(invocation)];
    let Some(output) = invocation.output.as_deref() else {
        return lines;
    };

    let color = if invocation.status == ToolStatus::Error {
        Color::LightRed
    } else {
        Color::DarkGray
    };
    let output_lines: Vec<&str> = output.lines().collect();
    lines.extend(output_lines.iter().take(MAX_OUTPUT_LINES).map(|line| {
        Line::from(vec![
            Span::raw("  "),
            Span::styled(line.to_string(), Style::default().fg(color)),
        ])
    }));
    if output_lines.len() > MAX_OUTPUT_LINES {
        lines.push(Line::from(Span::styled(
            format!("  … {} more lines", output_lines.len() - MAX_OUTPUT_LINES),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTEXT: PartContext<'static> = PartContext {
        element_id: "r1",
        is_complete: false,
        code_block_start_index: 0,
    };

    fn invocation(status: ToolStatus, output: Option<&str>) -> ToolInvocation {
        ToolInvocation {
            id: "call-1".into(),
            tool_name: "run_tests".into(),
            message: "cargo test".into(),
            status,
            is_hidden: false,
            output: output.map(str::to_string),
        }
    }

    #[test]
    fn header_color_follows_status() {
        let line = tool_header_line(&invocation(ToolStatus::Running, None));
        assert_eq!(line.spans[0].style.fg, Some(Color::Blue));
        let line = tool_header_line(&invocation(ToolStatus::Error, None));
        assert_eq!(line.spans[0].style.fg, Some(Color::Red));
    }

    #[test]
    fn same_call_is_kept_and_refreshed() {
        let mut part = ToolInvocationPart::new(invocation(ToolStatus::Running, None));
        let node_id = part.dom_node().unwrap().id;
        let finished =
            ChatContent::ToolInvocation(invocation(ToolStatus::Success, Some("ok\n2 passed")));

        assert!(part.has_same_content(&finished, &[], &CONTEXT));
        assert!(part.refresh(&finished));
        assert_eq!(part.dom_node().unwrap().id, node_id);
        assert_eq!(part.dom_node().unwrap().height(), 3);
        assert!(!part.refresh(&finished));
    }

    #[test]
    fn long_output_is_truncated() {
        let output = (0..9).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let lines = tool_lines(&invocation(ToolStatus::Success, Some(&output)));
        assert_eq!(lines.len(), 1 + MAX_OUTPUT_LINES + 1);
    }

    #[test]
    fn hidden_invocation_has_no_node() {
        let mut hidden = invocation(ToolStatus::Running, None);
        hidden.is_hidden = true;
        let part = ToolInvocationPart::new(hidden);
        assert!(part.dom_node().is_none());
        assert!(!part.has_same_content(
            &ChatContent::ToolInvocation(invocation(ToolStatus::Running, None)),
            &[],
            &CONTEXT
        ));
    }
}
