use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ratatui::style::{Color, Style};
use ratatui::text::Line;

use crate::markdown::lines_to_plain_text;

/// Inline error shown in place of an output that could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputErrorBlock {
    NoRenderer { mime: String, fallback_text: String },
    ActivationFailed { renderer_id: String, message: String },
    RenderFailed { renderer_id: String, message: String },
    FallbacksExhausted { mime: String },
}

impl OutputErrorBlock {
    fn to_lines(&self) -> Vec<Line<'static>> {
        let error = Style::default().fg(Color::LightRed);
        match self {
            OutputErrorBlock::NoRenderer {
                mime,
                fallback_text,
            } => {
                let mut lines = vec![Line::styled(
                    format!(
                        "No renderer could be found for output. \
                         It has the following mimetype: {mime}"
                    ),
                    error,
                )];
                let muted = Style::default().fg(Color::Gray);
                lines.extend(
                    fallback_text
                        .lines()
                        .map(|line| Line::styled(line.to_string(), muted)),
                );
                lines
            }
            OutputErrorBlock::ActivationFailed {
                renderer_id,
                message,
            } => vec![Line::styled(
                format!("Error loading renderer '{renderer_id}': {message}"),
                error,
            )],
            OutputErrorBlock::RenderFailed {
                renderer_id,
                message,
            } => vec![Line::styled(
                format!("Error rendering output with '{renderer_id}': {message}"),
                error,
            )],
            OutputErrorBlock::FallbacksExhausted { mime } => vec![Line::styled(
                format!("Could not render content for '{mime}'"),
                error,
            )],
        }
    }
}

#[derive(Default)]
struct ElementState {
    lines: Vec<Line<'static>>,
    errors: Vec<OutputErrorBlock>,
    visible: bool,
}

/// The slot an output renders into. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct OutputElement {
    state: Arc<Mutex<ElementState>>,
}

impl Default for OutputElement {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputElement {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ElementState {
                visible: true,
                ..ElementState::default()
            })),
        }
    }

    /// Replace the rendered content, clearing any previous error.
    pub fn set_lines(&self, lines: Vec<Line<'static>>) {
        let mut state = self.lock();
        state.lines = lines;
        state.errors.clear();
    }

    pub fn append_lines(&self, lines: impl IntoIterator<Item = Line<'static>>) {
        self.lock().lines.extend(lines);
    }

    pub fn show_error(&self, block: OutputErrorBlock) {
        let mut state = self.lock();
        state.lines.extend(block.to_lines());
        state.errors.push(block);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.lines.clear();
        state.errors.clear();
    }

    pub fn set_visible(&self, visible: bool) {
        self.lock().visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    pub fn lines(&self) -> Vec<Line<'static>> {
        self.lock().lines.clone()
    }

    pub fn errors(&self) -> Vec<OutputErrorBlock> {
        self.lock().errors.clone()
    }

    pub fn plain_text(&self) -> String {
        lines_to_plain_text(&self.lock().lines)
    }

    /// Height in rows; hidden outputs take no space.
    pub fn height(&self) -> f64 {
        let state = self.lock();
        if state.visible {
            state.lines.len() as f64
        } else {
            0.0
        }
    }

    fn lock(&self) -> MutexGuard<'_, ElementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
