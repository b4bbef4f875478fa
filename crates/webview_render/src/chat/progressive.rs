//! Word-budgeted progressive rendering of streaming responses.
//!
//! Each tick computes how many words may be visible, given the time since
//! the last render and the response's observed word rate, then slices the
//! response content down to that budget.

use tokio::time::Instant;

use super::content::{
    annotate_special_markdown_content, ChatContent, ChatResponseViewModel, RenderData,
};
use super::words::get_n_words;
use crate::config::ProgressiveRenderConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressiveRenderData {
    pub num_words_to_render: usize,
    /// Words per second used for this budget.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressiveSlice {
    pub content: Vec<ChatContent>,
    /// Budget ran out inside a markdown chunk.
    pub more_content_available: bool,
    /// Bookkeeping to store on the response once this slice is applied.
    pub render_data: RenderData,
}

/// Words per second for `response`. Settled (complete or paused) responses
/// use a higher floor so they finish quickly.
pub fn progressive_render_rate(
    response: &ChatResponseViewModel,
    config: &ProgressiveRenderConfig,
) -> f64 {
    let settled = response.is_complete || response.is_paused;
    let (min_rate, default_rate) = if settled {
        (config.settled_min_rate, config.default_settled_rate)
    } else {
        (config.min_rate, config.default_streaming_rate)
    };

    match response.timings().implied_word_load_rate {
        Some(rate) if rate > 0.0 => rate.clamp(min_rate, config.max_rate.max(min_rate)),
        _ => default_rate,
    }
}

pub fn get_data_for_progressive_render(
    response: &ChatResponseViewModel,
    now: Instant,
    config: &ProgressiveRenderConfig,
) -> ProgressiveRenderData {
    let rate = progressive_render_rate(response, config);
    let rendered = response
        .render_data
        .as_ref()
        .and_then(|data| Some((data.rendered_word_count, data.last_render_time?)));

    let num_words_to_render = match rendered {
        // First render shows one word so something appears immediately.
        None => 1,
        Some((rendered_word_count, last_render_time)) => {
            let elapsed = now.saturating_duration_since(last_render_time).as_secs_f64();
            rendered_word_count + (elapsed * rate).floor() as usize
        }
    };

    ProgressiveRenderData {
        num_words_to_render,
        rate,
    }
}

/// Slice the response to `data.num_words_to_render` words.
///
/// References always come first. Non-markdown parts that directly follow a
/// fully consumed markdown chunk are included whole.
pub fn get_next_progressive_render_content(
    response: &ChatResponseViewModel,
    data: ProgressiveRenderData,
    now: Instant,
) -> ProgressiveSlice {
    let renderable = annotate_special_markdown_content(response.content());
    let mut parts = Vec::with_capacity(renderable.len() + 2);
    if !response.content_references.is_empty() {
        parts.push(ChatContent::References {
            references: response.content_references.clone(),
        });
    }

    let mut more_content_available = false;
    let mut needed_words = data.num_words_to_render;
    // Words this slice shows, so the next budget starts from what is on screen.
    let mut shown_words = 0;
    let mut index = 0;
    while index < renderable.len() {
        match &renderable[index] {
            ChatContent::Markdown { content } => {
                let words = get_n_words(content, needed_words);
                shown_words += words.returned_word_count;
                if !words.is_full_string {
                    more_content_available = true;
                    parts.push(ChatContent::markdown(words.value));
                    break;
                }
                parts.push(renderable[index].clone());
                while let Some(next) = renderable
                    .get(index + 1)
                    .filter(|next| !next.is_markdown())
                {
                    parts.push(next.clone());
                    index += 1;
                }
                needed_words = needed_words.saturating_sub(words.returned_word_count);
            }
            other => parts.push(other.clone()),
        }
        index += 1;
    }

    let render_data = RenderData {
        last_render_time: Some(now),
        rendered_word_count: shown_words,
        rendered_parts: parts.clone(),
    };

    if should_show_working_progress(response, &parts) {
        parts.push(ChatContent::Working);
    }

    ProgressiveSlice {
        content: parts,
        more_content_available,
        render_data,
    }
}

/// Whether to append the working indicator after `parts`: only while the
/// response streams, and only when nothing at the tail already shows
/// activity.
pub fn should_show_working_progress(
    response: &ChatResponseViewModel,
    parts: &[ChatContent],
) -> bool {
    if response.is_complete || response.is_paused || response.is_canceled {
        return false;
    }
    match parts.last() {
        None => true,
        Some(ChatContent::Markdown { content }) => content.is_empty(),
        Some(ChatContent::References { .. }) | Some(ChatContent::PrepareToolInvocation { .. }) => {
            true
        }
        Some(ChatContent::ToolInvocation(invocation)) => {
            invocation.is_complete() || invocation.is_hidden
        }
        Some(ChatContent::TextEditGroup(group)) => group.done && !group.from_tool,
        Some(ChatContent::ProgressTask {
            settled, deferred, ..
        }) => *deferred && *settled,
        Some(_) => false,
    }
}
