//! Content part system for chat transcript rows.
//!
//! Each content kind is rendered by a part created through a factory. Parts
//! live until the diff engine finds new content they do not match.

pub mod error;
pub mod markdown;
pub mod progress;
pub mod references;
pub mod simple;
pub mod text_edit;
pub mod tool_invocation;

use std::collections::HashMap;
use std::sync::Arc;

use ratatui::style::Color;

use super::code_blocks::CodeBlockInfo;
use super::content::{ChatContent, ContentKind, ToolStatus};
use super::row::DomNode;

/// What a part may know about the row it renders into.
#[derive(Debug, Clone, Copy)]
pub struct PartContext<'a> {
    pub element_id: &'a str,
    pub is_complete: bool,
    /// Index of this part's first code block within the response.
    pub code_block_start_index: usize,
}

pub trait ChatContentPart: Send {
    fn kind(&self) -> ContentKind;

    /// `None` for parts that render nothing.
    fn dom_node(&self) -> Option<&DomNode>;

    /// Whether this part already shows `content`. `following` is the content
    /// after it in the row.
    fn has_same_content(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        context: &PartContext<'_>,
    ) -> bool;

    fn code_blocks(&self) -> &[CodeBlockInfo] {
        &[]
    }

    /// Renumber this part's code blocks to start at `start`, after an
    /// earlier part in the row gained or lost blocks.
    fn renumber_code_blocks(&mut self, _start: usize) {}

    /// Update a kept part in place from its matching content. Returns
    /// whether its node changed.
    fn refresh(&mut self, _content: &ChatContent) -> bool {
        false
    }

    fn dispose(&mut self) {}
}

pub trait ContentPartFactory: Send + Sync {
    /// Which content kinds this factory builds parts for.
    fn supported_kinds(&self) -> &'static [ContentKind];

    fn create(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>>;
}

pub struct ContentPartRegistry {
    factories: HashMap<ContentKind, Arc<dyn ContentPartFactory>>,
}

impl Default for ContentPartRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ContentPartRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(markdown::MarkdownPartFactory));
        registry.register(Arc::new(references::ReferencesPartFactory));
        registry.register(Arc::new(tool_invocation::ToolInvocationPartFactory));
        registry.register(Arc::new(text_edit::TextEditPartFactory));
        registry.register(Arc::new(progress::ProgressPartFactory));
        registry.register(Arc::new(simple::SimplePartFactory));
        registry
    }

    /// Register `factory` for every kind it declares, replacing earlier
    /// registrations.
    pub fn register(&mut self, factory: Arc<dyn ContentPartFactory>) {
        for &kind in factory.supported_kinds() {
            self.factories.insert(kind, factory.clone());
        }
    }

    pub fn get(&self, kind: ContentKind) -> Option<Arc<dyn ContentPartFactory>> {
        self.factories.get(&kind).cloned()
    }

    pub fn create(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        context: &PartContext<'_>,
    ) -> anyhow::Result<Box<dyn ChatContentPart>> {
        let kind = content.kind();
        let factory = self
            .get(kind)
            .ok_or_else(|| anyhow::anyhow!("no content part registered for {kind:?}"))?;
        factory.create(content, following, context)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn status_color(status: ToolStatus) -> Color {
    match status {
        ToolStatus::Pending => Color::Yellow,
        ToolStatus::Running => Color::Blue,
        ToolStatus::Success => Color::Green,
        ToolStatus::Error => Color::Red,
    }
}
