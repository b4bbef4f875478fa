//! Host message dispatch for the notebook webview.
//!
//! [`NotebookViewModel`] owns the live output containers and markup cells
//! and bridges host commands onto the [`OutputRunner`] and the
//! [`RendererRegistry`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use async_channel::Receiver;
use indexmap::IndexMap;
use ratatui::text::Line;
use regex::Regex;
use tracing::{debug, trace, warn};

use super::dimensions::{DimensionOptions, DimensionReporter};
use super::element::OutputElement;
use super::output_item::{OutputItem, OutputItemRequests};
use super::output_runner::{output_action, OutputRunner};
use super::protocol::{
    decode_host_message, HostMessage, MarkupCellInit, MessageChannel, OutputContent,
    WebviewMessage,
};
use super::renderers::{ModuleLoader, RendererRegistry};
use crate::compile_regex;
use crate::config::NotebookConfig;
use crate::markdown::render_markdown_lines;

/// A rendered output slot within a cell.
#[derive(Clone)]
pub struct OutputContainer {
    pub cell_id: String,
    pub top: f64,
    pub element: OutputElement,
    /// Renderer that last drew into the element, for disposal on clear.
    pub renderer_id: Option<String>,
    pub acked_height: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MarkupCell {
    pub content: String,
    pub top: f64,
    pub visible: bool,
    pub lines: Vec<Line<'static>>,
}

impl MarkupCell {
    fn height(&self) -> f64 {
        if self.visible {
            self.lines.len() as f64
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct ViewState {
    outputs: HashMap<String, OutputContainer>,
    markup_cells: IndexMap<String, MarkupCell>,
}

#[derive(Clone)]
pub struct NotebookViewModel {
    channel: MessageChannel,
    runner: OutputRunner,
    registry: RendererRegistry,
    requests: OutputItemRequests,
    dimensions: DimensionReporter,
    state: Arc<Mutex<ViewState>>,
}

impl NotebookViewModel {
    pub fn new(
        channel: MessageChannel,
        loader: Arc<dyn ModuleLoader>,
        config: &NotebookConfig,
    ) -> Self {
        let requests = OutputItemRequests::new(channel.clone());
        Self {
            runner: OutputRunner::new(config.idle_timeout()),
            registry: RendererRegistry::new(loader, channel.clone(), requests.clone()),
            dimensions: DimensionReporter::new(channel.clone()),
            requests,
            channel,
            state: Arc::new(Mutex::new(ViewState::default())),
        }
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &OutputRunner {
        &self.runner
    }

    pub fn output(&self, output_id: &str) -> Option<OutputContainer> {
        self.lock().outputs.get(output_id).cloned()
    }

    pub fn markup_cell(&self, id: &str) -> Option<MarkupCell> {
        self.lock().markup_cells.get(id).cloned()
    }

    /// Consume host messages until the channel closes. Announces readiness
    /// first.
    pub async fn run(self, inbound: Receiver<HostMessage>) {
        if let Err(err) = self.channel.post_message(WebviewMessage::Initialized) {
            warn!("failed to announce webview: {err}");
            return;
        }
        while let Ok(message) = inbound.recv().await {
            self.handle_message(message);
        }
        debug!("host channel closed; cancelling outstanding renders");
        self.runner.cancel_all();
    }

    /// Decode and dispatch one raw JSON message. Malformed input is logged
    /// and dropped.
    pub fn handle_raw_message(&self, raw: &str) {
        match decode_host_message(raw) {
            Ok(message) => self.handle_message(message),
            Err(err) => warn!("dropping host message: {err}"),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn handle_message(&self, message: HostMessage) {
        trace!(?message, "host message");
        match message {
            HostMessage::Html {
                cell_id,
                output_id,
                top,
                content,
                create_on_idle,
            } => self.render_output(cell_id, output_id, top, content, create_on_idle),
            HostMessage::ShowOutput {
                output_id, top, ..
            } => self.set_output_visibility(&output_id, Some(top), true),
            HostMessage::HideOutput { output_id, .. } => {
                self.set_output_visibility(&output_id, None, false)
            }
            HostMessage::ClearOutput {
                output_id,
                renderer_id,
                ..
            } => self.clear_output(&output_id, renderer_id),
            HostMessage::AckDimension { updates } => {
                let mut state = self.lock();
                for ack in updates {
                    match state.outputs.get_mut(&ack.output_id) {
                        Some(container) => container.acked_height = Some(ack.height),
                        None => debug!(output_id = %ack.output_id, "ack for unknown output"),
                    }
                }
            }
            HostMessage::Preload { resources } => self.registry.load_preloads(resources),
            HostMessage::UpdateRenderers { renderers } => {
                self.registry.update_renderer_data(renderers)
            }
            HostMessage::ReturnOutputItem { request_id, output } => {
                self.requests.resolve(request_id, output)
            }
            HostMessage::CreateMarkupCell { cell } => self.create_markup_cell(cell),
            HostMessage::UpdateMarkupCell { id, content } => {
                self.update_markup_cell(&id, Some(content), None, None)
            }
            HostMessage::ShowMarkupCell { id, top, content } => {
                self.update_markup_cell(&id, content, Some(top), Some(true))
            }
            HostMessage::HideMarkupCells { ids } => {
                for id in ids {
                    self.update_markup_cell(&id, None, None, Some(false));
                }
            }
            HostMessage::DeleteMarkupCell { ids } => {
                let mut state = self.lock();
                for id in ids {
                    state.markup_cells.shift_remove(&id);
                }
            }
        }
    }

    /// Signal that the host has spare time for deferred output creation.
    pub fn notify_idle(&self) {
        self.runner.notify_idle();
    }

    fn render_output(
        &self,
        cell_id: String,
        output_id: String,
        top: f64,
        content: OutputContent,
        create_on_idle: bool,
    ) {
        let element = {
            let mut state = self.lock();
            let container = state
                .outputs
                .entry(output_id.clone())
                .or_insert_with(|| OutputContainer {
                    cell_id: cell_id.clone(),
                    top,
                    element: OutputElement::new(),
                    renderer_id: None,
                    acked_height: None,
                });
            container.cell_id = cell_id;
            container.top = top;
            if let OutputContent::Renderer { renderer_id, .. } = &content {
                container.renderer_id = renderer_id.clone();
            }
            container.element.clone()
        };

        let registry = self.registry.clone();
        let requests = self.requests.clone();
        let dimensions = self.dimensions.clone();
        let id = output_id.clone();
        let action = output_action(move |signal| async move {
            // Representations fetched for earlier content of this output are stale.
            requests.forget_output(&id);
            element.clear();
            element.set_visible(true);
            match content {
                OutputContent::Html { html_content } => {
                    element.set_lines(html_to_lines(&html_content))
                }
                OutputContent::Renderer {
                    renderer_id,
                    output,
                    all_output_mimes,
                } => {
                    let item = OutputItem::from_payload(&id, output, all_output_mimes.into());
                    registry
                        .render(item, renderer_id.as_deref(), &element, &signal)
                        .await;
                }
            }
            if signal.is_cancelled() {
                return Ok(());
            }
            dimensions.update_height(
                &id,
                element.height(),
                DimensionOptions {
                    is_output: true,
                    init: true,
                },
            );
            Ok(())
        });

        if create_on_idle {
            self.runner.enqueue_idle(&output_id, action);
        } else {
            self.runner.enqueue(&output_id, action);
        }
    }

    fn set_output_visibility(&self, output_id: &str, top: Option<f64>, visible: bool) {
        let element = {
            let mut state = self.lock();
            let Some(container) = state.outputs.get_mut(output_id) else {
                debug!(output_id, visible, "visibility change for unknown output");
                return;
            };
            if let Some(top) = top {
                container.top = top;
            }
            container.element.clone()
        };

        let dimensions = self.dimensions.clone();
        let id = output_id.to_string();
        self.runner.enqueue(
            output_id,
            output_action(move |_signal| async move {
                element.set_visible(visible);
                dimensions.update_height(&id, element.height(), DimensionOptions::default());
                Ok(())
            }),
        );
    }

    fn clear_output(&self, output_id: &str, renderer_id: Option<String>) {
        self.runner.cancel_output(output_id);
        let removed = self.lock().outputs.remove(output_id);
        let renderer_id = renderer_id.or_else(|| removed.and_then(|c| c.renderer_id));
        if let Some(renderer_id) = renderer_id {
            self.registry.dispose_output_item(&renderer_id, output_id);
        }
        self.requests.forget_output(output_id);
    }

    fn create_markup_cell(&self, init: MarkupCellInit) {
        let cell = MarkupCell {
            lines: render_markdown_lines(&init.content),
            content: init.content,
            top: init.top,
            visible: init.visible,
        };
        let height = cell.height();
        self.lock().markup_cells.insert(init.id.clone(), cell);
        self.dimensions.update_height(
            &init.id,
            height,
            DimensionOptions {
                is_output: false,
                init: true,
            },
        );
    }

    fn update_markup_cell(
        &self,
        id: &str,
        content: Option<String>,
        top: Option<f64>,
        visible: Option<bool>,
    ) {
        let changed_height = {
            let mut state = self.lock();
            let Some(cell) = state.markup_cells.get_mut(id) else {
                debug!(cell_id = id, "update for unknown markup cell");
                return;
            };
            let before = cell.height();
            if let Some(content) = content.filter(|content| *content != cell.content) {
                cell.lines = render_markdown_lines(&content);
                cell.content = content;
            }
            if let Some(top) = top {
                cell.top = top;
            }
            if let Some(visible) = visible {
                cell.visible = visible;
            }
            let after = cell.height();
            (after != before).then_some(after)
        };

        if let Some(height) = changed_height {
            self.dimensions
                .update_height(id, height, DimensionOptions::default());
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"(?s)<[^>]*>"));

/// Plain-text rendition of inline HTML output.
fn html_to_lines(html: &str) -> Vec<Line<'static>> {
    let with_breaks = html.replace("<br>", "\n").replace("<br/>", "\n");
    let text = HTML_TAG.replace_all(&with_breaks, "");
    text.lines()
        .map(|line| line.trim_end())
        .filter(|line| !line.is_empty())
        .map(|line| Line::from(line.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::notebook::protocol::{
        DimensionUpdate, HostEndpoint, OutputItemPayload, RendererDescriptor,
    };
    use crate::notebook::renderers::test_support::{descriptor, Behavior, FakeLoader};

    fn view_model(
        loader: FakeLoader,
        renderers: Vec<RendererDescriptor>,
    ) -> (NotebookViewModel, HostEndpoint) {
        let (channel, _inbound, host) = MessageChannel::connect();
        let vm = NotebookViewModel::new(channel, Arc::new(loader), &NotebookConfig::default());
        vm.handle_message(HostMessage::UpdateRenderers { renderers });
        (vm, host)
    }

    fn html_message(output_id: &str, mime: &str, text: &str, create_on_idle: bool) -> HostMessage {
        HostMessage::Html {
            cell_id: "cell1".into(),
            output_id: output_id.into(),
            top: 10.0,
            content: OutputContent::Renderer {
                renderer_id: None,
                output: OutputItemPayload {
                    mime: mime.into(),
                    data: text.as_bytes().to_vec(),
                    metadata: serde_json::Value::Null,
                },
                all_output_mimes: vec![mime.into()],
            },
            create_on_idle,
        }
    }

    async fn next_dimension(host: &HostEndpoint) -> Vec<DimensionUpdate> {
        loop {
            match host.from_webview.recv().await {
                Ok(WebviewMessage::Dimension { updates }) => return updates,
                Ok(_) => continue,
                Err(err) => panic!("channel closed: {err}"),
            }
        }
    }

    #[tokio::test]
    async fn html_renders_output_and_reports_initial_height() {
        let (vm, host) = view_model(
            FakeLoader::default(),
            vec![descriptor("text", &["text/plain"])],
        );
        vm.handle_message(html_message("out1", "text/plain", "hello", false));

        let updates = next_dimension(&host).await;
        assert_eq!(
            updates,
            vec![DimensionUpdate {
                id: "out1".into(),
                height: 1.0,
                is_output: Some(true),
                init: Some(true),
            }]
        );
        let container = vm.output("out1").unwrap();
        assert_eq!(container.element.plain_text(), "text:hello");
        assert_eq!(container.top, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_on_idle_waits_for_idle_signal() {
        let (vm, host) = view_model(
            FakeLoader::default(),
            vec![descriptor("text", &["text/plain"])],
        );
        vm.handle_message(html_message("out1", "text/plain", "later", true));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(vm.output("out1").unwrap().element.lines().is_empty());

        vm.notify_idle();
        next_dimension(&host).await;
        assert_eq!(vm.output("out1").unwrap().element.plain_text(), "text:later");
    }

    #[tokio::test]
    async fn hide_and_show_report_heights_in_order() {
        let (vm, host) = view_model(
            FakeLoader::default(),
            vec![descriptor("text", &["text/plain"])],
        );
        vm.handle_message(html_message("out1", "text/plain", "hi", false));
        next_dimension(&host).await;

        vm.handle_message(HostMessage::HideOutput {
            cell_id: "cell1".into(),
            output_id: "out1".into(),
        });
        assert_eq!(next_dimension(&host).await[0].height, 0.0);

        vm.handle_message(HostMessage::ShowOutput {
            cell_id: "cell1".into(),
            output_id: "out1".into(),
            top: 42.0,
        });
        assert_eq!(next_dimension(&host).await[0].height, 1.0);
        assert_eq!(vm.output("out1").unwrap().top, 42.0);
    }

    #[tokio::test]
    async fn clear_output_cancels_and_disposes() {
        let loader = FakeLoader::with(&[("text", Behavior::Render)]);
        let disposed = loader.state.disposed.clone();
        let (vm, host) = view_model(loader, vec![descriptor("text", &["text/plain"])]);
        vm.handle_message(html_message("out1", "text/plain", "hi", false));
        next_dimension(&host).await;

        vm.handle_message(HostMessage::ClearOutput {
            cell_id: "cell1".into(),
            output_id: "out1".into(),
            renderer_id: Some("text".into()),
        });
        assert!(vm.output("out1").is_none());
        assert!(!vm.runner().has_task("out1"));
        assert_eq!(*disposed.lock().unwrap(), vec!["out1".to_string()]);
    }

    #[tokio::test]
    async fn markup_cells_render_markdown_and_report_height_changes() {
        let (vm, host) = view_model(FakeLoader::default(), vec![]);
        vm.handle_message(HostMessage::CreateMarkupCell {
            cell: MarkupCellInit {
                id: "md1".into(),
                content: "# Title".into(),
                top: 0.0,
                visible: true,
            },
        });
        let created = next_dimension(&host).await;
        assert_eq!(created[0].id, "md1");
        assert_eq!(created[0].init, Some(true));
        assert!(vm.markup_cell("md1").unwrap().lines.len() >= 1);

        vm.handle_message(HostMessage::UpdateMarkupCell {
            id: "md1".into(),
            content: "# Title\n\nbody text\n\nmore".into(),
        });
        let updated = next_dimension(&host).await;
        assert!(updated[0].height > created[0].height);

        vm.handle_message(HostMessage::HideMarkupCells {
            ids: vec!["md1".into()],
        });
        assert_eq!(next_dimension(&host).await[0].height, 0.0);

        vm.handle_message(HostMessage::DeleteMarkupCell {
            ids: vec!["md1".into()],
        });
        assert!(vm.markup_cell("md1").is_none());
    }

    /// Answer `getOutputItem` requests with `data` until the next dimension
    /// report. Returns how many requests were answered.
    async fn answer_fetches_until_dimension(
        vm: &NotebookViewModel,
        host: &HostEndpoint,
        data: &str,
    ) -> usize {
        let mut answered = 0;
        loop {
            match host.from_webview.recv().await {
                Ok(WebviewMessage::GetOutputItem {
                    request_id, mime, ..
                }) => {
                    answered += 1;
                    vm.handle_message(HostMessage::ReturnOutputItem {
                        request_id,
                        output: Some(OutputItemPayload {
                            mime,
                            data: data.as_bytes().to_vec(),
                            metadata: serde_json::Value::Null,
                        }),
                    });
                }
                Ok(WebviewMessage::Dimension { .. }) => return answered,
                Ok(_) => continue,
                Err(err) => panic!("channel closed: {err}"),
            }
        }
    }

    #[tokio::test]
    async fn updated_output_refetches_alternate_representations() {
        let loader = FakeLoader::with(&[("multi", Behavior::DeclineMimes(vec!["a/1".into()]))]);
        let (vm, host) = view_model(loader, vec![descriptor("multi", &["a/1", "a/2"])]);
        let html = |text: &str| HostMessage::Html {
            cell_id: "cell1".into(),
            output_id: "out1".into(),
            top: 0.0,
            content: OutputContent::Renderer {
                renderer_id: None,
                output: OutputItemPayload {
                    mime: "a/1".into(),
                    data: text.as_bytes().to_vec(),
                    metadata: serde_json::Value::Null,
                },
                all_output_mimes: vec!["a/1".into(), "a/2".into()],
            },
            create_on_idle: false,
        };

        vm.handle_message(html("first"));
        assert_eq!(answer_fetches_until_dimension(&vm, &host, "v1").await, 1);
        assert_eq!(vm.output("out1").unwrap().element.plain_text(), "multi:v1");

        vm.handle_message(html("second"));
        assert_eq!(answer_fetches_until_dimension(&vm, &host, "v2").await, 1);
        assert_eq!(vm.output("out1").unwrap().element.plain_text(), "multi:v2");
    }

    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let (vm, host) = view_model(FakeLoader::default(), vec![]);
        vm.handle_raw_message("{\"type\":\"nonsense\"}");
        vm.handle_raw_message("not json");
        assert!(host.from_webview.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_announces_and_dispatches() {
        let (channel, inbound, host) = MessageChannel::connect();
        let vm = NotebookViewModel::new(
            channel,
            Arc::new(FakeLoader::default()),
            &NotebookConfig::default(),
        );
        let task = tokio::spawn(vm.clone().run(inbound));
        assert_eq!(
            host.from_webview.recv().await.unwrap(),
            WebviewMessage::Initialized
        );

        host.to_webview
            .send(HostMessage::UpdateRenderers {
                renderers: vec![descriptor("text", &["text/plain"])],
            })
            .await
            .unwrap();
        drop(host.to_webview);
        task.await.unwrap();
        assert_eq!(vm.registry().renderer_ids(), vec!["text"]);
    }

    #[test]
    fn html_tag_regex_compiles() {
        assert!(HTML_TAG.is_match("<p>"));
    }

    #[test]
    fn html_is_flattened_to_text_lines() {
        let lines = html_to_lines("<div><b>bold</b> text<br>second</div>");
        let text: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(text, vec!["bold text", "second"]);
    }
}
