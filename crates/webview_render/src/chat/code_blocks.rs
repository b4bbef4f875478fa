//! Code block bookkeeping for rendered responses.

use std::collections::HashMap;

use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlockInfo {
    pub response_id: String,
    /// Position among all code blocks of the response.
    pub index: usize,
    pub language: Option<String>,
    pub code: String,
}

impl CodeBlockInfo {
    pub fn editor_uri(&self) -> String {
        code_block_uri(&self.response_id, self.index)
    }
}

pub fn code_block_uri(response_id: &str, index: usize) -> String {
    format!("chat-code-block://{response_id}/{index}")
}

/// Lookup tables for code blocks, by response and by editor URI.
///
/// Owned by the list item renderer. Entries are added when a part that
/// contains code blocks is created and removed when that part is disposed,
/// so lookups never see blocks from a replaced part.
#[derive(Debug, Default)]
pub struct CodeBlockRegistry {
    by_response_id: HashMap<String, Vec<Option<CodeBlockInfo>>>,
    by_editor_uri: HashMap<String, CodeBlockInfo>,
}

impl CodeBlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, blocks: &[CodeBlockInfo]) {
        for block in blocks {
            trace!(response_id = %block.response_id, index = block.index, "register code block");
            let slots = self
                .by_response_id
                .entry(block.response_id.clone())
                .or_default();
            if slots.len() <= block.index {
                slots.resize(block.index + 1, None);
            }
            slots[block.index] = Some(block.clone());
            self.by_editor_uri.insert(block.editor_uri(), block.clone());
        }
    }

    /// Drop entries for `blocks`, unless a newer part has since claimed the
    /// same slot with different content.
    pub fn unregister(&mut self, blocks: &[CodeBlockInfo]) {
        for block in blocks {
            let uri = block.editor_uri();
            if self.by_editor_uri.get(&uri) == Some(block) {
                self.by_editor_uri.remove(&uri);
            }
            if let Some(slots) = self.by_response_id.get_mut(&block.response_id) {
                if slots.get(block.index).and_then(Option::as_ref) == Some(block) {
                    slots[block.index] = None;
                }
                while matches!(slots.last(), Some(None)) {
                    slots.pop();
                }
                if slots.is_empty() {
                    self.by_response_id.remove(&block.response_id);
                }
            }
        }
    }

    pub fn for_response(&self, response_id: &str) -> Vec<&CodeBlockInfo> {
        self.by_response_id
            .get(response_id)
            .map(|slots| slots.iter().flatten().collect())
            .unwrap_or_default()
    }

    pub fn by_editor_uri(&self, uri: &str) -> Option<&CodeBlockInfo> {
        self.by_editor_uri.get(uri)
    }

    pub fn is_empty(&self) -> bool {
        self.by_editor_uri.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(index: usize, code: &str) -> CodeBlockInfo {
        CodeBlockInfo {
            response_id: "r1".into(),
            index,
            language: Some("rust".into()),
            code: code.into(),
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = CodeBlockRegistry::new();
        registry.register(&[block(0, "fn a() {}"), block(1, "fn b() {}")]);
        assert_eq!(registry.for_response("r1").len(), 2);
        assert_eq!(
            registry.by_editor_uri("chat-code-block://r1/1").map(|b| b.code.as_str()),
            Some("fn b() {}")
        );
    }

    #[test]
    fn unregister_leaves_newer_claims() {
        let mut registry = CodeBlockRegistry::new();
        let old = block(0, "old");
        let new = block(0, "new");
        registry.register(&[old.clone()]);
        registry.register(&[new.clone()]);
        registry.unregister(&[old]);
        assert_eq!(registry.for_response("r1"), vec![&new]);

        registry.unregister(&[new]);
        assert!(registry.is_empty());
        assert!(registry.for_response("r1").is_empty());
    }
}
