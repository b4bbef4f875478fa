//! Chat transcript content model: the renderable part union and the
//! request/response view models the list renders.

use derive_more::IsVariant;
use tokio::time::Instant;

use super::words::count_words;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IsVariant)]
pub enum ToolStatus {
    Pending,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentReference {
    pub uri: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub tool_name: String,
    pub message: String,
    pub status: ToolStatus,
    /// Hidden invocations render no node.
    pub is_hidden: bool,
    pub output: Option<String>,
}

impl ToolInvocation {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ToolStatus::Success | ToolStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEditGroup {
    pub uri: String,
    pub original: String,
    pub modified: String,
    pub done: bool,
    /// Produced by a tool invocation rather than by the response text.
    pub from_tool: bool,
}

#[derive(Debug, Clone, PartialEq, IsVariant)]
pub enum ChatContent {
    Markdown { content: String },
    References { references: Vec<ContentReference> },
    ToolInvocation(ToolInvocation),
    PrepareToolInvocation { tool_name: String },
    TextEditGroup(TextEditGroup),
    Confirmation {
        title: String,
        message: String,
        is_used: bool,
    },
    ProgressTask {
        content: String,
        settled: bool,
        /// Settles asynchronously after the task was reported.
        deferred: bool,
    },
    ChangesSummary { files: Vec<String> },
    ErrorDetails { message: String, is_warning: bool },
    Attachments { names: Vec<String> },
    /// Synthetic "still working" indicator appended while streaming.
    Working,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Markdown,
    References,
    ToolInvocation,
    PrepareToolInvocation,
    TextEditGroup,
    Confirmation,
    ProgressTask,
    ChangesSummary,
    ErrorDetails,
    Attachments,
    Working,
}

impl ChatContent {
    pub fn markdown(content: impl Into<String>) -> Self {
        ChatContent::Markdown {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ChatContent::Markdown { .. } => ContentKind::Markdown,
            ChatContent::References { .. } => ContentKind::References,
            ChatContent::ToolInvocation(_) => ContentKind::ToolInvocation,
            ChatContent::PrepareToolInvocation { .. } => ContentKind::PrepareToolInvocation,
            ChatContent::TextEditGroup(_) => ContentKind::TextEditGroup,
            ChatContent::Confirmation { .. } => ContentKind::Confirmation,
            ChatContent::ProgressTask { .. } => ContentKind::ProgressTask,
            ChatContent::ChangesSummary { .. } => ContentKind::ChangesSummary,
            ChatContent::ErrorDetails { .. } => ContentKind::ErrorDetails,
            ChatContent::Attachments { .. } => ContentKind::Attachments,
            ChatContent::Working => ContentKind::Working,
        }
    }
}

/// Merge adjacent markdown chunks so word budgets and part identity span
/// the whole run of text.
pub fn annotate_special_markdown_content(content: &[ChatContent]) -> Vec<ChatContent> {
    let mut result: Vec<ChatContent> = Vec::with_capacity(content.len());
    for part in content {
        match (result.last_mut(), part) {
            (
                Some(ChatContent::Markdown { content: previous }),
                ChatContent::Markdown { content: next },
            ) => previous.push_str(next),
            _ => result.push(part.clone()),
        }
    }
    result
}

/// Words across the merged markdown chunks of `content`, counted chunk by
/// chunk the way the progressive slicer consumes them.
pub fn markdown_word_count(content: &[ChatContent]) -> usize {
    annotate_special_markdown_content(content)
        .iter()
        .map(|part| match part {
            ChatContent::Markdown { content } => count_words(content),
            _ => 0,
        })
        .sum()
}

/// Word arrival statistics for a streaming response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentUpdateTimings {
    pub first_word_time: Option<Instant>,
    pub last_update_time: Instant,
    /// Words per second since the first word arrived.
    pub implied_word_load_rate: Option<f64>,
    pub last_word_count: usize,
}

/// Progressive render bookkeeping. Absent when the response is not being
/// progressively rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderData {
    /// `None` until the first progressive render.
    pub last_render_time: Option<Instant>,
    pub rendered_word_count: usize,
    pub rendered_parts: Vec<ChatContent>,
}

#[derive(Debug, Clone)]
pub struct ChatResponseViewModel {
    pub id: String,
    content: Vec<ChatContent>,
    pub content_references: Vec<ContentReference>,
    pub is_complete: bool,
    pub is_paused: bool,
    pub is_canceled: bool,
    timings: ContentUpdateTimings,
    pub render_data: Option<RenderData>,
    pub current_rendered_height: Option<usize>,
}

impl ChatResponseViewModel {
    pub fn new(id: impl Into<String>, now: Instant) -> Self {
        Self {
            id: id.into(),
            content: Vec::new(),
            content_references: Vec::new(),
            is_complete: false,
            is_paused: false,
            is_canceled: false,
            timings: ContentUpdateTimings {
                first_word_time: None,
                last_update_time: now,
                implied_word_load_rate: None,
                last_word_count: 0,
            },
            render_data: None,
            current_rendered_height: None,
        }
    }

    pub fn content(&self) -> &[ChatContent] {
        &self.content
    }

    pub fn timings(&self) -> &ContentUpdateTimings {
        &self.timings
    }

    /// Append streamed text, extending a trailing markdown chunk.
    pub fn append_markdown(&mut self, text: &str, now: Instant) {
        match self.content.last_mut() {
            Some(ChatContent::Markdown { content }) => content.push_str(text),
            _ => self.content.push(ChatContent::markdown(text)),
        }
        self.update_timings(now);
    }

    pub fn push_content(&mut self, part: ChatContent, now: Instant) {
        self.content.push(part);
        self.update_timings(now);
    }

    /// Replace the tool invocation with the same id, or append it.
    pub fn upsert_tool_invocation(&mut self, invocation: ToolInvocation, now: Instant) {
        let existing = self.content.iter_mut().find_map(|part| match part {
            ChatContent::ToolInvocation(current) if current.id == invocation.id => Some(current),
            _ => None,
        });
        match existing {
            Some(current) => *current = invocation,
            None => self.content.push(ChatContent::ToolInvocation(invocation)),
        }
        self.update_timings(now);
    }

    pub fn set_content(&mut self, content: Vec<ChatContent>, now: Instant) {
        self.content = content;
        self.update_timings(now);
    }

    pub fn complete(&mut self) {
        self.is_complete = true;
    }

    pub fn cancel(&mut self) {
        self.is_canceled = true;
        self.is_complete = true;
    }

    /// Concatenated markdown of the whole response.
    pub fn markdown_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ChatContent::Markdown { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    fn update_timings(&mut self, now: Instant) {
        let word_count = markdown_word_count(&self.content);
        if word_count == self.timings.last_word_count {
            return;
        }

        let first_word_time = *self.timings.first_word_time.get_or_insert(now);
        let elapsed = now.saturating_duration_since(first_word_time).as_secs_f64();
        let implied_word_load_rate = (elapsed > 0.0)
            .then(|| word_count as f64 / elapsed)
            .or(self.timings.implied_word_load_rate);

        self.timings = ContentUpdateTimings {
            first_word_time: Some(first_word_time),
            last_update_time: now,
            implied_word_load_rate,
            last_word_count: word_count,
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequestViewModel {
    pub id: String,
    pub message: String,
    pub attachments: Vec<String>,
}

impl ChatRequestViewModel {
    /// Requests render as their attachments, if any, then the message.
    pub fn content(&self) -> Vec<ChatContent> {
        let mut content = Vec::with_capacity(2);
        if !self.attachments.is_empty() {
            content.push(ChatContent::Attachments {
                names: self.attachments.clone(),
            });
        }
        content.push(ChatContent::markdown(self.message.clone()));
        content
    }
}

#[derive(Debug, Clone, IsVariant)]
pub enum ChatTreeItem {
    Request(ChatRequestViewModel),
    Response(ChatResponseViewModel),
}

impl ChatTreeItem {
    pub fn id(&self) -> &str {
        match self {
            ChatTreeItem::Request(request) => &request.id,
            ChatTreeItem::Response(response) => &response.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn adjacent_markdown_is_merged() {
        let merged = annotate_special_markdown_content(&[
            ChatContent::markdown("Hello "),
            ChatContent::markdown("world"),
            ChatContent::Working,
            ChatContent::markdown("again"),
        ]);
        assert_eq!(
            merged,
            vec![
                ChatContent::markdown("Hello world"),
                ChatContent::Working,
                ChatContent::markdown("again"),
            ]
        );
    }

    #[test]
    fn timings_track_word_rate_from_first_word() {
        let start = Instant::now();
        let mut response = ChatResponseViewModel::new("r1", start);
        response.append_markdown("one two", start);
        assert_eq!(response.timings().first_word_time, Some(start));
        assert_eq!(response.timings().implied_word_load_rate, None);

        let later = start + Duration::from_secs(2);
        response.append_markdown(" three four", later);
        let timings = response.timings();
        assert_eq!(timings.last_word_count, 4);
        assert_eq!(timings.last_update_time, later);
        assert_eq!(timings.implied_word_load_rate, Some(2.0));
    }

    #[test]
    fn word_count_does_not_join_chunks_across_other_parts() {
        let start = Instant::now();
        let mut response = ChatResponseViewModel::new("r1", start);
        response.append_markdown("abc", start);
        response.push_content(ChatContent::Working, start);
        response.append_markdown("def", start);
        assert_eq!(response.markdown_text(), "abcdef");
        assert_eq!(response.timings().last_word_count, 2);
    }

    #[test]
    fn non_word_updates_keep_timings() {
        let start = Instant::now();
        let mut response = ChatResponseViewModel::new("r1", start);
        response.append_markdown("one", start);
        response.push_content(ChatContent::Working, start + Duration::from_secs(5));
        assert_eq!(response.timings().last_update_time, start);
    }

    #[test]
    fn upsert_replaces_matching_tool_invocation() {
        let now = Instant::now();
        let mut response = ChatResponseViewModel::new("r1", now);
        let mut invocation = ToolInvocation {
            id: "call-1".into(),
            tool_name: "read_file".into(),
            message: "Reading main.rs".into(),
            status: ToolStatus::Running,
            is_hidden: false,
            output: None,
        };
        response.upsert_tool_invocation(invocation.clone(), now);
        invocation.status = ToolStatus::Success;
        response.upsert_tool_invocation(invocation.clone(), now);
        assert_eq!(response.content(), &[ChatContent::ToolInvocation(invocation)]);
    }

    #[test]
    fn request_content_puts_attachments_first() {
        let request = ChatRequestViewModel {
            id: "q1".into(),
            message: "why?".into(),
            attachments: vec!["main.rs".into()],
        };
        let content = request.content();
        assert!(content[0].is_attachments());
        assert_eq!(content[1], ChatContent::markdown("why?"));
    }
}
