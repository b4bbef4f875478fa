//! Parts whose rendering is a pure function of their content.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use super::{ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::content::{ChatContent, ContentKind};
use crate::chat::row::DomNode;

pub struct SimplePartFactory;

impl ContentPartFactory for SimplePartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[
            ContentKind::PrepareToolInvocation,
            ContentKind::Confirmation,
            ContentKind::ChangesSummary,
            ContentKind::ErrorDetails,
            ContentKind::Attachments,
            ContentKind::Working,
        ]
    }

    fn create(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        _context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let lines = simple_lines(content)?;
        Ok(Box::new(SimplePart {
            content: content.clone(),
            node: DomNode::new(lines),
        }))
    }
}

/// Matches only identical content.
pub struct SimplePart {
    content: ChatContent,
    node: DomNode,
}

impl ChatContentPart for SimplePart {
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

fn simple_lines(content: &ChatContent) -> anyhow::Result<Vec<Line<'static>>> {
    let dim = Style::default().fg(Color::DarkGray);
    let lines = match content {
        ChatContent::PrepareToolInvocation { tool_name } => vec![Line::from(Span::styled(
            format!("Preparing {tool_name}…"),
            dim,
        ))],
        ChatContent::Confirmation {
            title,
            message,
            is_used,
        } => {
            let mut lines = vec![
                Line::from(Span::styled(
                    title.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(message.clone()),
            ];
            if !is_used {
                lines.push(Line::from(vec![
                    Span::styled("[Continue]", Style::default().fg(Color::Green)),
                    Span::raw(" "),
                    Span::styled("[Cancel]", dim),
                ]));
            }
            lines
        }
        ChatContent::ChangesSummary { files } => {
            let noun = if files.len() == 1 { "file" } else { "files" };
            let mut lines = vec![Line::from(Span::styled(
                format!("{} {noun} changed", files.len()),
                Style::default().add_modifier(Modifier::BOLD),
            ))];
            lines.extend(
                files
                    .iter()
                    .map(|file| Line::from(vec![Span::raw("  "), Span::styled(file.clone(), dim)])),
            );
            lines
        }
        ChatContent::ErrorDetails {
            message,
            is_warning,
        } => {
            let (label, color) = if *is_warning {
                ("Warning: ", Color::Yellow)
            } else {
                ("Error: ", Color::LightRed)
            };
            vec![Line::from(vec![
                Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::styled(message.clone(), Style::default().fg(color)),
            ])]
        }
        ChatContent::Attachments { names } => names
            .iter()
            .map(|name| Line::from(Span::styled(format!("📎 {name}"), dim)))
            .collect(),
        ChatContent::Working => vec![Line::from(Span::styled("Working…", dim))],
        other => anyhow::bail!("no simple rendering for {:?}", other.kind()),
    };
    Ok(lines)
}
