//! The transcript list: rows, a visible window, and the event loop that
//! feeds model updates and progressive ticks into the row renderer.

use std::collections::HashMap;
use std::ops::Range;

use async_channel::Receiver;
use ratatui::text::Line;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::content::{
    ChatContent, ChatRequestViewModel, ChatResponseViewModel, ChatTreeItem, ContentReference,
    ToolInvocation,
};
use super::list_renderer::{ChatListItemRenderer, RowTemplate};

/// Changes to the chat model, in the order they happened.
#[derive(Debug, Clone)]
pub enum ChatModelUpdate {
    AddRequest(ChatRequestViewModel),
    AddResponse { id: String },
    AppendMarkdown { response_id: String, text: String },
    PushContent { response_id: String, content: ChatContent },
    AddReference { response_id: String, reference: ContentReference },
    UpsertToolInvocation { response_id: String, invocation: ToolInvocation },
    SetPaused { response_id: String, paused: bool },
    Complete { response_id: String },
    Cancel { response_id: String },
}

pub struct ChatListView {
    renderer: ChatListItemRenderer,
    items: Vec<ChatTreeItem>,
    rows: HashMap<String, RowTemplate>,
    /// `None` shows every item.
    visible_range: Option<Range<usize>>,
}

impl ChatListView {
    pub fn new(renderer: ChatListItemRenderer) -> Self {
        Self {
            renderer,
            items: Vec::new(),
            rows: HashMap::new(),
            visible_range: None,
        }
    }

    pub fn renderer(&self) -> &ChatListItemRenderer {
        &self.renderer
    }

    pub fn items(&self) -> &[ChatTreeItem] {
        &self.items
    }

    pub fn push_item(&mut self, item: ChatTreeItem, now: Instant) {
        self.items.push(item);
        let last = self.items.len() - 1;
        // The previous last row stops rendering progressively.
        if last > 0 {
            self.render_item(last - 1, now);
        }
        self.render_item(last, now);
    }

    pub fn apply_update(&mut self, update: ChatModelUpdate, now: Instant) {
        trace!(?update, "chat model update");
        let response_id = match update {
            ChatModelUpdate::AddRequest(request) => {
                self.push_item(ChatTreeItem::Request(request), now);
                return;
            }
            ChatModelUpdate::AddResponse { id } => {
                self.push_item(ChatTreeItem::Response(ChatResponseViewModel::new(id, now)), now);
                return;
            }
            ChatModelUpdate::AppendMarkdown { response_id, text } => {
                self.with_response(&response_id, |r| r.append_markdown(&text, now));
                response_id
            }
            ChatModelUpdate::PushContent {
                response_id,
                content,
            } => {
                self.with_response(&response_id, |r| r.push_content(content, now));
                response_id
            }
            ChatModelUpdate::AddReference {
                response_id,
                reference,
            } => {
                self.with_response(&response_id, |r| r.content_references.push(reference));
                response_id
            }
            ChatModelUpdate::UpsertToolInvocation {
                response_id,
                invocation,
            } => {
                self.with_response(&response_id, |r| r.upsert_tool_invocation(invocation, now));
                response_id
            }
            ChatModelUpdate::SetPaused {
                response_id,
                paused,
            } => {
                self.with_response(&response_id, |r| r.is_paused = paused);
                response_id
            }
            ChatModelUpdate::Complete { response_id } => {
                self.with_response(&response_id, ChatResponseViewModel::complete);
                response_id
            }
            ChatModelUpdate::Cancel { response_id } => {
                self.with_response(&response_id, ChatResponseViewModel::cancel);
                response_id
            }
        };

        if let Some(index) = self.index_of(&response_id) {
            self.render_item(index, now);
        }
    }

    /// Show only `range` of the items. Rows scrolled out of view release
    /// their parts.
    pub fn set_visible_range(&mut self, range: Option<Range<usize>>, now: Instant) {
        self.visible_range = range;
        let visible: Vec<String> = self
            .visible_indices()
            .map(|index| self.items[index].id().to_string())
            .collect();
        let hidden: Vec<String> = self
            .rows
            .keys()
            .filter(|id| !visible.contains(id))
            .cloned()
            .collect();
        for id in hidden {
            if let Some(mut template) = self.rows.remove(&id) {
                self.renderer.dispose_template(&mut template);
            }
        }
        self.render(now);
    }

    /// Render every visible row.
    pub fn render(&mut self, now: Instant) {
        for index in self.visible_indices() {
            self.render_item(index, now);
        }
    }

    /// Advance progressive rendering of the last row, if it is due.
    pub fn tick(&mut self, now: Instant) {
        let Some(ChatTreeItem::Response(response)) = self.items.last_mut() else {
            return;
        };
        let Some(template) = self.rows.get_mut(&response.id) else {
            return;
        };
        self.renderer.tick(response, template, now);
    }

    /// When the last row next wants a tick.
    pub fn next_deadline(&self) -> Option<Instant> {
        let last = self.items.last()?;
        self.rows
            .get(last.id())?
            .timer()
            .map(|timer| timer.deadline())
    }

    pub fn row_lines(&self, id: &str) -> Option<Vec<Line<'static>>> {
        self.rows.get(id).map(|row| row.container.lines())
    }

    pub fn row_text(&self, id: &str) -> Option<String> {
        self.rows.get(id).map(|row| row.container.plain_text())
    }

    fn visible_indices(&self) -> Range<usize> {
        let len = self.items.len();
        match &self.visible_range {
            Some(range) => range.start.min(len)..range.end.min(len),
            None => 0..len,
        }
    }

    fn render_item(&mut self, index: usize, now: Instant) {
        if !self.visible_indices().contains(&index) {
            return;
        }
        let is_last = index + 1 == self.items.len();
        let item = &mut self.items[index];
        let template = self.rows.entry(item.id().to_string()).or_default();
        self.renderer.render_element(item, template, is_last, now);
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn with_response(&mut self, id: &str, update: impl FnOnce(&mut ChatResponseViewModel)) {
        let response = self.items.iter_mut().find_map(|item| match item {
            ChatTreeItem::Response(response) if response.id == id => Some(response),
            _ => None,
        });
        match response {
            Some(response) => update(response),
            None => warn!(response_id = id, "update for unknown response"),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive `view` from `updates` until cancelled, or until the update stream
/// has closed and the last row has finished rendering.
pub async fn run_chat_list(
    mut view: ChatListView,
    updates: Receiver<ChatModelUpdate>,
    cancel: CancellationToken,
) -> ChatListView {
    let mut updates_open = true;
    loop {
        let deadline = view.next_deadline();
        if !updates_open && deadline.is_none() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("chat list cancelled");
                break;
            }
            update = updates.recv(), if updates_open => match update {
                Ok(update) => view.apply_update(update, Instant::now()),
                Err(_) => {
                    debug!("chat model closed");
                    updates_open = false;
                }
            },
            _ = wait_until(deadline) => view.tick(Instant::now()),
        }
    }
    view
}
