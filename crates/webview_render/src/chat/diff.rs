//! Structural diff between rendered parts and new content.

use super::content::ChatContent;
use super::parts::{ChatContentPart, PartContext};

/// For each position of `content`, `None` when the part already rendered
/// there shows it, otherwise the content to build. Positions past the end
/// of `rendered` always need building.
pub fn diff(
    rendered: &[Box<dyn ChatContentPart>],
    content: &[ChatContent],
    context: &PartContext<'_>,
) -> Vec<Option<ChatContent>> {
    content
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let following = &content[index + 1..];
            match rendered.get(index) {
                Some(part) if part.has_same_content(candidate, following, context) => None,
                _ => Some(candidate.clone()),
            }
        })
        .collect()
}

pub fn is_unchanged(diff: &[Option<ChatContent>]) -> bool {
    diff.iter().all(Option::is_none)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::chat::content::ContentReference;
    use crate::chat::parts::ContentPartRegistry;

    const CONTEXT: PartContext<'static> = PartContext {
        element_id: "r1",
        is_complete: false,
        code_block_start_index: 0,
    };

    fn references(n: usize) -> ChatContent {
        ChatContent::References {
            references: (0..n)
                .map(|i| ContentReference {
                    uri: format!("file:///{i}"),
                    title: None,
                })
                .collect(),
        }
    }

    fn build(content: &[ChatContent]) -> Vec<Box<dyn ChatContentPart>> {
        let registry = ContentPartRegistry::with_builtin();
        content
            .iter()
            .enumerate()
            .map(|(i, c)| registry.create(c, &content[i + 1..], &CONTEXT).unwrap())
            .collect()
    }

    #[test]
    fn grown_markdown_changes_while_references_stay() {
        let parts = build(&[references(2), ChatContent::markdown("abc")]);
        let next = [references(2), ChatContent::markdown("abcdef")];
        assert_eq!(
            diff(&parts, &next, &CONTEXT),
            vec![None, Some(ChatContent::markdown("abcdef"))]
        );
    }

    #[test]
    fn extra_positions_always_build() {
        let parts = build(&[ChatContent::markdown("a")]);
        let next = [ChatContent::markdown("a"), ChatContent::Working];
        assert_eq!(
            diff(&parts, &next, &CONTEXT),
            vec![None, Some(ChatContent::Working)]
        );
    }

    #[test]
    fn unchanged_content_diffs_to_nothing() {
        let content = [references(1), ChatContent::markdown("text"), ChatContent::Working];
        let parts = build(&content);
        assert!(is_unchanged(&diff(&parts, &content, &CONTEXT)));
    }
}
