//! Renders one transcript row: a request, or a response either in full or
//! progressively while it streams.

use std::time::Duration;

use async_channel::Sender;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::code_blocks::CodeBlockRegistry;
use super::content::{
    annotate_special_markdown_content, ChatContent, ChatRequestViewModel, ChatResponseViewModel,
    ChatTreeItem, ContentKind,
};
use super::diff::{diff, is_unchanged};
use super::parts::error::ErrorContentPart;
use super::parts::{ChatContentPart, ContentPartRegistry, PartContext};
use super::progressive::{
    get_data_for_progressive_render, get_next_progressive_render_content,
    should_show_working_progress,
};
use super::row::RowContainer;
use crate::config::ProgressiveRenderConfig;

/// Published whenever a row's rendered height changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHeightChange {
    pub element_id: String,
    pub height: usize,
}

/// Recurring tick schedule for a progressively rendering row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressiveRenderTimer {
    interval: Duration,
    next_tick: Instant,
}

impl ProgressiveRenderTimer {
    pub fn start(now: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next_tick: now + interval,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next_tick
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    fn rearm(&mut self, now: Instant) {
        self.next_tick = now + self.interval;
    }
}

/// Per-row render state, reused while the row shows the same element.
#[derive(Default)]
pub struct RowTemplate {
    pub container: RowContainer,
    rendered_parts: Vec<Box<dyn ChatContentPart>>,
    element_id: Option<String>,
    timer: Option<ProgressiveRenderTimer>,
    height: Option<usize>,
}

impl RowTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element_id(&self) -> Option<&str> {
        self.element_id.as_deref()
    }

    pub fn timer(&self) -> Option<&ProgressiveRenderTimer> {
        self.timer.as_ref()
    }

    pub fn rendered_kinds(&self) -> Vec<ContentKind> {
        self.rendered_parts.iter().map(|part| part.kind()).collect()
    }
}

pub struct ChatListItemRenderer {
    parts: ContentPartRegistry,
    code_blocks: CodeBlockRegistry,
    config: ProgressiveRenderConfig,
    height_events: Sender<ItemHeightChange>,
    visible: bool,
}

impl ChatListItemRenderer {
    pub fn new(config: ProgressiveRenderConfig, height_events: Sender<ItemHeightChange>) -> Self {
        Self::with_parts(config, ContentPartRegistry::with_builtin(), height_events)
    }

    pub fn with_parts(
        config: ProgressiveRenderConfig,
        parts: ContentPartRegistry,
        height_events: Sender<ItemHeightChange>,
    ) -> Self {
        Self {
            parts,
            code_blocks: CodeBlockRegistry::new(),
            config,
            height_events,
            visible: true,
        }
    }

    pub fn code_blocks(&self) -> &CodeBlockRegistry {
        &self.code_blocks
    }

    pub fn config(&self) -> &ProgressiveRenderConfig {
        &self.config
    }

    /// While hidden, progressive ticks report completion without rendering.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Render `element` into `template`. Only the last row of the list
    /// renders progressively; it gets a tick timer until it settles.
    pub fn render_element(
        &mut self,
        element: &mut ChatTreeItem,
        template: &mut RowTemplate,
        is_last: bool,
        now: Instant,
    ) {
        if template.element_id.as_deref() != Some(element.id()) {
            self.dispose_template(template);
            template.element_id = Some(element.id().to_string());
        }
        template.timer = None;

        match element {
            ChatTreeItem::Request(request) => self.render_request(request, template),
            ChatTreeItem::Response(response) => {
                let progressive =
                    is_last && (!response.is_complete || response.render_data.is_some());
                if !progressive {
                    self.render_response_basic(response, template);
                } else if !self.do_next_progressive_render(response, template, now) {
                    template.timer = Some(ProgressiveRenderTimer::start(
                        now,
                        self.config.tick_interval(),
                    ));
                }
            }
        }
    }

    /// Run the row's progressive tick if it is due. Returns `true` once the
    /// row needs no further ticks.
    pub fn tick(
        &mut self,
        response: &mut ChatResponseViewModel,
        template: &mut RowTemplate,
        now: Instant,
    ) -> bool {
        match template.timer {
            None => return true,
            Some(timer) if !timer.is_due(now) => return false,
            Some(_) => {}
        }

        if self.do_next_progressive_render(response, template, now) {
            template.timer = None;
            true
        } else {
            if let Some(timer) = template.timer.as_mut() {
                timer.rearm(now);
            }
            false
        }
    }

    /// One progressive step. Returns `true` when rendering is complete for
    /// now: either the response has settled into its final content, or
    /// everything received so far is visible.
    pub fn do_next_progressive_render(
        &mut self,
        response: &mut ChatResponseViewModel,
        template: &mut RowTemplate,
        now: Instant,
    ) -> bool {
        if !self.visible {
            return true;
        }
        if response.is_canceled {
            response.render_data = None;
            self.render_response_basic(response, template);
            return true;
        }

        let data = get_data_for_progressive_render(response, now, &self.config);
        let slice = get_next_progressive_render_content(response, data, now);
        let context = PartContext {
            element_id: &response.id,
            is_complete: response.is_complete,
            code_block_start_index: 0,
        };
        let changes = diff(&template.rendered_parts, &slice.content, &context);

        if is_unchanged(&changes) {
            if slice.more_content_available {
                // Budget has not reached the next word yet.
                return false;
            }
            if response.is_complete {
                trace!(element_id = %response.id, "end progressive render");
                response.render_data = None;
                self.render_response_basic(response, template);
            }
            return true;
        }

        trace!(
            element_id = %response.id,
            words = data.num_words_to_render,
            rate = data.rate,
            "progressive render"
        );
        response.render_data = Some(slice.render_data);
        self.render_chat_content_diff(changes, &slice.content, &context, template);
        response.current_rendered_height = Some(self.publish_height(&response.id, template));
        false
    }

    /// Render the full current content without a word budget.
    pub fn render_response_basic(
        &mut self,
        response: &mut ChatResponseViewModel,
        template: &mut RowTemplate,
    ) {
        let mut content = Vec::with_capacity(response.content().len() + 2);
        if !response.content_references.is_empty() {
            content.push(ChatContent::References {
                references: response.content_references.clone(),
            });
        }
        content.extend(annotate_special_markdown_content(response.content()));
        if should_show_working_progress(response, &content) {
            content.push(ChatContent::Working);
        }

        let context = PartContext {
            element_id: &response.id,
            is_complete: response.is_complete,
            code_block_start_index: 0,
        };
        let changes = diff(&template.rendered_parts, &content, &context);
        self.render_chat_content_diff(changes, &content, &context, template);
        response.current_rendered_height = Some(self.publish_height(&response.id, template));
    }

    pub fn render_request(&mut self, request: &ChatRequestViewModel, template: &mut RowTemplate) {
        let content = request.content();
        let context = PartContext {
            element_id: &request.id,
            is_complete: true,
            code_block_start_index: 0,
        };
        let changes = diff(&template.rendered_parts, &content, &context);
        self.render_chat_content_diff(changes, &content, &context, template);
        self.publish_height(&request.id, template);
    }

    /// Apply `changes` to the row: drop parts past the end of `content`,
    /// rebuild changed positions, refresh kept ones.
    pub fn render_chat_content_diff(
        &mut self,
        changes: Vec<Option<ChatContent>>,
        content: &[ChatContent],
        context: &PartContext<'_>,
        template: &mut RowTemplate,
    ) {
        while template.rendered_parts.len() > content.len() {
            let Some(mut part) = template.rendered_parts.pop() else {
                break;
            };
            if let Some(node) = part.dom_node() {
                if let Err(err) = template.container.remove(node.id) {
                    warn!(
                        element_id = context.element_id,
                        "failed to remove trailing part: {err}"
                    );
                }
            }
            self.dispose_part(part.as_mut());
        }

        let mut code_block_index = 0;
        for (index, change) in changes.into_iter().enumerate() {
            let Some(new_content) = change else {
                let Some(part) = template.rendered_parts.get_mut(index) else {
                    continue;
                };
                let misnumbered = part
                    .code_blocks()
                    .first()
                    .is_some_and(|block| block.index != code_block_index);
                if misnumbered {
                    self.code_blocks.unregister(part.code_blocks());
                    part.renumber_code_blocks(code_block_index);
                    self.code_blocks.register(part.code_blocks());
                }
                if part.refresh(&content[index]) {
                    if let Some(node) = part.dom_node() {
                        if let Err(err) = template.container.update(node) {
                            warn!(
                                element_id = context.element_id,
                                index,
                                "failed to refresh content part: {err}"
                            );
                        }
                    }
                }
                code_block_index += part.code_blocks().len();
                continue;
            };

            let part_context = PartContext {
                code_block_start_index: code_block_index,
                ..*context
            };
            let new_part = self.create_part(&new_content, &content[index + 1..], &part_context);
            // Release the replaced part's blocks first; they may equal the new ones.
            if let Some(old) = template.rendered_parts.get(index) {
                self.code_blocks.unregister(old.code_blocks());
            }
            self.code_blocks.register(new_part.code_blocks());
            code_block_index += new_part.code_blocks().len();

            let old_node = template
                .rendered_parts
                .get(index)
                .and_then(|part| part.dom_node())
                .map(|node| node.id);
            let anchor = template.rendered_parts[..index.min(template.rendered_parts.len())]
                .iter()
                .rev()
                .find_map(|part| part.dom_node())
                .map(|node| node.id);
            let spliced = match (old_node, new_part.dom_node()) {
                (Some(old), Some(node)) => template.container.replace_with(old, node.clone()),
                (None, Some(node)) => template.container.insert_after(anchor, node.clone()),
                (Some(old), None) => template.container.remove(old).map(drop),
                (None, None) => Ok(()),
            };
            if let Err(err) = spliced {
                warn!(
                    element_id = context.element_id,
                    index,
                    "failed to place content part: {err}"
                );
            }

            if index < template.rendered_parts.len() {
                let mut old = std::mem::replace(&mut template.rendered_parts[index], new_part);
                old.dispose();
            } else {
                template.rendered_parts.push(new_part);
            }
        }
    }

    /// Release everything the row holds. The template can then render a
    /// different element.
    pub fn dispose_template(&mut self, template: &mut RowTemplate) {
        template.timer = None;
        for mut part in template.rendered_parts.drain(..) {
            self.code_blocks.unregister(part.code_blocks());
            part.dispose();
        }
        template.container.clear();
        template.element_id = None;
        template.height = None;
    }

    fn create_part(
        &self,
        content: &ChatContent,
        following: &[ChatContent],
        context: &PartContext<'_>,
    ) -> Box<dyn ChatContentPart> {
        match self.parts.create(content, following, context) {
            Ok(part) => part,
            Err(err) => {
                error!(
                    element_id = context.element_id,
                    kind = ?content.kind(),
                    "failed to render content part: {err:?}"
                );
                Box::new(ErrorContentPart::new(content.clone(), &err))
            }
        }
    }

    fn dispose_part(&mut self, part: &mut dyn ChatContentPart) {
        self.code_blocks.unregister(part.code_blocks());
        part.dispose();
    }

    fn publish_height(&self, element_id: &str, template: &mut RowTemplate) -> usize {
        let height = template.container.height();
        if template.height != Some(height) {
            template.height = Some(height);
            let change = ItemHeightChange {
                element_id: element_id.to_string(),
                height,
            };
            if let Err(err) = self.height_events.try_send(change) {
                debug!(element_id, "height listener gone: {err}");
            }
        }
        height
    }
}
