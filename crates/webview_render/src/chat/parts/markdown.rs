use super::{ChatContentPart, ContentPartFactory, PartContext};
use crate::chat::code_blocks::CodeBlockInfo;
use crate::chat::content::{ChatContent, ContentKind};
use crate::chat::row::DomNode;
use crate::markdown::render_markdown_lines;

pub struct MarkdownPartFactory;

impl ContentPartFactory for MarkdownPartFactory {
    fn supported_kinds(&self) -> &'static [ContentKind] {
        &[ContentKind::Markdown]
    }

    fn create(
        &self,
        content: &ChatContent,
        _following: &[ChatContent],
        context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let ChatContent::Markdown { content } = content else {
            anyhow::bail!("markdown part cannot render {:?}", content.kind());
        };
        Ok(Box::new(MarkdownPart::new(content, context)))
    }
}

/// Rendered markdown text. Growing text never matches, so streamed
/// chunks are rebuilt as they extend.
pub struct MarkdownPart {
    text: String,
    node: Option<DomNode>,
    code_blocks: Vec<CodeBlockInfo>,
}

impl MarkdownPart {
    pub fn new(text: &str, context: &PartContext<'_>) -> Self {
        let lines = render_markdown_lines(text);
        let code_blocks = extract_code_blocks(text)
            .into_iter()
            .enumerate()
            .map(|(offset, (language, code))| CodeBlockInfo {
                response_id: context.element_id.to_string(),
                index: context.code_block_start_index + offset,
                language,
                code,
            })
            .collect();
        Self {
            text: text.to_string(),
            node: (!lines.is_empty()).then(|| DomNode::new(lines)),
            code_blocks,
        }
    }
}

impl ChatContentPart for MarkdownPart {
    fn kind(&self) -> ContentKind {
        ContentKind::Markdown
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
        matches!(content, ChatContent::Markdown { content } if *content == self.text)
    }

    fn code_blocks(&self) -> &[CodeBlockInfo] {
        &self.code_blocks
    }

    fn renumber_code_blocks(&mut self, start: usize) {
        for (offset, block) in self.code_blocks.iter_mut().enumerate() {
            block.index = start + offset;
        }
    }
}

/// Fenced code blocks as `(language, code)`. An unterminated trailing fence
/// counts as a block.
fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut blocks = Vec::new();
    let mut current: Option<(Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info.trim();
                    let language = (!language.is_empty()).then(|| language.to_string());
                    current = Some((language, Vec::new()));
                }
            }
            Some((language, body)) if trimmed.starts_with("```") => {
                blocks.push((language, body.join("\n")));
            }
            Some((language, mut body)) => {
                body.push(line);
                current = Some((language, body));
            }
        }
    }
    if let Some((language, body)) = current {
        blocks.push((language, body.join("\n")));
    }
    blocks
}
