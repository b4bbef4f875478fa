//! Renderer registry: lazy activation, preload ordering and mimetype
//! fallback.
//!
//! Renderer modules are plugins resolved through a [`ModuleLoader`]. Each
//! [`Renderer`] activates at most once; the activation result, success or
//! failure, is memoized for the life of the instance. A fresh attempt after
//! a failure requires the host to push changed renderer data, which builds a
//! new instance.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::element::{OutputElement, OutputErrorBlock};
use super::output_item::{OutputItem, OutputItemRequests};
use super::protocol::{
    ChannelError, MessageChannel, PreloadResource, RendererDescriptor, RendererEntrypoint,
    WebviewMessage,
};

/// Error name a renderer throws to decline an item and request fallback.
pub const FALLBACK_TO_NEXT_RENDERER: &str = "vscode.fallbackToNextRenderer";

#[derive(Debug, Clone, Error)]
pub enum RendererError {
    #[error("{name}: {message}")]
    Thrown { name: String, message: String },
    #[error("renderer '{renderer_id}' failed to activate: {message}")]
    Activation {
        renderer_id: String,
        message: String,
    },
}

impl RendererError {
    pub fn fallback() -> Self {
        RendererError::Thrown {
            name: FALLBACK_TO_NEXT_RENDERER.to_string(),
            message: "renderer declined the output item".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        RendererError::Thrown {
            name: "Error".to_string(),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RendererError::Thrown { name, .. } => name,
            RendererError::Activation { .. } => "ActivationError",
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.name() == FALLBACK_TO_NEXT_RENDERER
    }

    fn message(&self) -> String {
        match self {
            RendererError::Thrown { message, .. } | RendererError::Activation { message, .. } => {
                message.clone()
            }
        }
    }
}

/// The API an activated renderer module exposes.
#[async_trait]
pub trait RendererApi: Send + Sync {
    async fn render_output_item(
        &self,
        item: &OutputItem,
        element: &OutputElement,
        signal: &CancellationToken,
    ) -> Result<(), RendererError>;

    /// Release per-output state. `None` means every output.
    fn dispose_output_item(&self, _output_id: Option<&str>) {}
}

#[async_trait]
pub trait RendererModule: Send + Sync {
    async fn activate(&self, context: RendererContext) -> anyhow::Result<Arc<dyn RendererApi>>;
}

/// Resolves renderer entrypoints and kernel preloads.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn import(&self, entrypoint: &RendererEntrypoint)
        -> anyhow::Result<Arc<dyn RendererModule>>;

    async fn load_preload(&self, _uri: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handed to a renderer module on activation.
#[derive(Clone)]
pub struct RendererContext {
    renderer_id: String,
    messaging: Option<MessageChannel>,
    registry: Weak<RegistryInner>,
}

impl RendererContext {
    pub fn renderer_id(&self) -> &str {
        &self.renderer_id
    }

    pub fn supports_messaging(&self) -> bool {
        self.messaging.is_some()
    }

    /// Post a message to the renderer's host-side counterpart. Returns
    /// `Ok(false)` when the renderer did not opt into messaging.
    pub fn post_message(&self, message: serde_json::Value) -> Result<bool, ChannelError> {
        let Some(channel) = &self.messaging else {
            return Ok(false);
        };
        channel.post_message(WebviewMessage::CustomRendererMessage {
            renderer_id: self.renderer_id.clone(),
            message,
        })?;
        Ok(true)
    }

    /// API of another renderer, if it has already activated.
    pub fn get_renderer(&self, id: &str) -> Option<Arc<dyn RendererApi>> {
        let registry = self.registry.upgrade()?;
        let renderer = lock(&registry.renderers).get(id).cloned()?;
        renderer.api()
    }
}

type ActivationFuture = Shared<BoxFuture<'static, Result<Arc<dyn RendererApi>, RendererError>>>;

pub struct Renderer {
    data: RendererDescriptor,
    load_promise: OnceLock<ActivationFuture>,
    api: OnceLock<Arc<dyn RendererApi>>,
}

impl Renderer {
    fn new(data: RendererDescriptor) -> Self {
        Self {
            data,
            load_promise: OnceLock::new(),
            api: OnceLock::new(),
        }
    }

    pub fn data(&self) -> &RendererDescriptor {
        &self.data
    }

    pub fn api(&self) -> Option<Arc<dyn RendererApi>> {
        self.api.get().cloned()
    }

    pub fn is_loading_or_loaded(&self) -> bool {
        self.load_promise.get().is_some()
    }

    /// Activate the renderer, once. Later and concurrent calls share the same
    /// outcome.
    pub async fn load(
        self: &Arc<Self>,
        registry: &RendererRegistry,
    ) -> Result<Arc<dyn RendererApi>, RendererError> {
        let activation = self
            .load_promise
            .get_or_init(|| self.start_activation(registry))
            .clone();
        activation.await
    }

    fn start_activation(self: &Arc<Self>, registry: &RendererRegistry) -> ActivationFuture {
        let renderer = Arc::downgrade(self);
        let registry = Arc::downgrade(&registry.inner);
        let renderer_id = self.data.id.clone();
        let entrypoint = self.data.entrypoint.clone();
        let messaging = self.data.messaging;

        async move {
            let activation_error = |message: String| RendererError::Activation {
                renderer_id: renderer_id.clone(),
                message,
            };
            let inner = registry
                .upgrade()
                .ok_or_else(|| activation_error("renderer registry was dropped".into()))?;
            let registry = RendererRegistry { inner };

            // Preload-provided globals must exist before any renderer runs.
            registry.inner.preloads.wait_for_all_current().await;

            debug!(renderer_id = %renderer_id, "activating renderer");
            let activated = async {
                let module = registry.inner.loader.import(&entrypoint).await?;
                let context = RendererContext {
                    renderer_id: renderer_id.clone(),
                    messaging: messaging.then(|| registry.inner.channel.clone()),
                    registry: Arc::downgrade(&registry.inner),
                };
                module.activate(context).await
            }
            .await;

            let api = match activated {
                Ok(api) => api,
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(renderer_id = %renderer_id, "renderer activation failed: {message}");
                    let _ = registry
                        .inner
                        .channel
                        .post_message(WebviewMessage::RendererActivationFailed {
                            renderer_id: renderer_id.clone(),
                            message: message.clone(),
                        });
                    return Err(activation_error(message));
                }
            };

            if let Some(renderer) = renderer.upgrade() {
                let _ = renderer.api.set(api.clone());
            }

            for dependent in registry.renderers_extending(&renderer_id) {
                if let Err(err) = dependent.load(&registry).await {
                    warn!(
                        renderer_id = %dependent.data.id,
                        extends = %renderer_id,
                        "extending renderer failed to load: {err}"
                    );
                }
            }

            Ok(api)
        }
        .boxed()
        .shared()
    }
}

#[derive(Default)]
struct PreloadTracker {
    preloads: Mutex<Vec<Shared<BoxFuture<'static, ()>>>>,
}

impl PreloadTracker {
    fn add(&self, preload: Shared<BoxFuture<'static, ()>>) {
        lock(&self.preloads).push(preload);
    }

    async fn wait_for_all_current(&self) {
        let current = lock(&self.preloads).clone();
        join_all(current).await;
    }
}

struct RegistryInner {
    renderers: Mutex<IndexMap<String, Arc<Renderer>>>,
    loader: Arc<dyn ModuleLoader>,
    preloads: PreloadTracker,
    channel: MessageChannel,
    requests: OutputItemRequests,
}

enum RenderAttempt {
    Done,
    Declined,
}

/// Owns the known renderers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RendererRegistry {
    inner: Arc<RegistryInner>,
}

impl RendererRegistry {
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        channel: MessageChannel,
        requests: OutputItemRequests,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                renderers: Mutex::new(IndexMap::new()),
                loader,
                preloads: PreloadTracker::default(),
                channel,
                requests,
            }),
        }
    }

    pub fn get_renderer(&self, id: &str) -> Option<Arc<Renderer>> {
        self.renderers().get(id).cloned()
    }

    pub fn renderer_ids(&self) -> Vec<String> {
        self.renderers().keys().cloned().collect()
    }

    /// Replace the renderer set. Descriptors equal by value keep their
    /// existing instance and its activation state.
    pub fn update_renderer_data(&self, descriptors: Vec<RendererDescriptor>) {
        let mut renderers = self.renderers();
        let mut next = IndexMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let renderer = match renderers.get(&descriptor.id) {
                Some(existing) if existing.data == descriptor => existing.clone(),
                _ => Arc::new(Renderer::new(descriptor.clone())),
            };
            next.insert(descriptor.id, renderer);
        }
        *renderers = next;
    }

    /// Start activating kernel preloads. Renderer loads issued afterwards
    /// wait for them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load_preloads(&self, resources: Vec<PreloadResource>) {
        for resource in resources {
            let loader = self.inner.loader.clone();
            let preload = async move {
                if let Err(err) = loader.load_preload(&resource.uri).await {
                    warn!(uri = %resource.uri, "preload failed to activate: {err:#}");
                }
            }
            .boxed()
            .shared();
            tokio::spawn(preload.clone());
            self.inner.preloads.add(preload);
        }
    }

    /// Choose a renderer for `mime`. An explicit `preferred` id must match
    /// exactly; otherwise non-builtin renderers win over builtin ones, and
    /// renderers that extend another are never chosen directly.
    pub fn find_renderer(&self, preferred: Option<&str>, mime: &str) -> Option<Arc<Renderer>> {
        let renderers = self.renderers();
        if let Some(id) = preferred {
            return renderers.get(id).cloned();
        }
        let mut candidates: Vec<&Arc<Renderer>> = renderers
            .values()
            .filter(|renderer| {
                renderer.data.entrypoint.extends.is_none()
                    && renderer.data.mime_types.iter().any(|m| m == mime)
            })
            .collect();
        candidates.sort_by_key(|renderer| renderer.data.is_builtin);
        candidates.first().map(|renderer| Arc::clone(renderer))
    }

    /// Render `item` into `element`, walking the output's other mimetypes
    /// while renderers decline. Failures render as inline error blocks;
    /// cancellation renders nothing.
    pub async fn render(
        &self,
        item: OutputItem,
        preferred: Option<&str>,
        element: &OutputElement,
        signal: &CancellationToken,
    ) {
        let Some(primary) = self.find_renderer(preferred, &item.mime) else {
            element.show_error(OutputErrorBlock::NoRenderer {
                mime: item.mime.clone(),
                fallback_text: item.text(),
            });
            return;
        };

        if let RenderAttempt::Done = self.render_with(&primary, &item, element, signal).await {
            return;
        }

        let alternates: Vec<String> = item.alternate_mimes().map(str::to_string).collect();
        for mime in alternates {
            if signal.is_cancelled() {
                return;
            }
            let Some(alternate) = self.inner.requests.fetch(&item, &mime).await else {
                debug!(
                    output_id = %item.output_id,
                    mime = %mime,
                    "alternate representation unavailable"
                );
                continue;
            };
            if signal.is_cancelled() {
                return;
            }
            let Some(renderer) = self.find_renderer(None, &alternate.mime) else {
                continue;
            };
            if let RenderAttempt::Done =
                self.render_with(&renderer, &alternate, element, signal).await
            {
                return;
            }
        }

        if signal.is_cancelled() {
            return;
        }
        element.show_error(OutputErrorBlock::FallbacksExhausted {
            mime: item.mime.clone(),
        });
    }

    pub fn dispose_output_item(&self, renderer_id: &str, output_id: &str) {
        if let Some(api) = self.get_renderer(renderer_id).and_then(|r| r.api()) {
            api.dispose_output_item(Some(output_id));
        }
    }

    async fn render_with(
        &self,
        renderer: &Arc<Renderer>,
        item: &OutputItem,
        element: &OutputElement,
        signal: &CancellationToken,
    ) -> RenderAttempt {
        let renderer_id = renderer.data.id.clone();
        let api = match renderer.load(self).await {
            Ok(api) => api,
            Err(err) => {
                if !signal.is_cancelled() {
                    element.show_error(OutputErrorBlock::ActivationFailed {
                        renderer_id,
                        message: err.message(),
                    });
                }
                return RenderAttempt::Done;
            }
        };
        if signal.is_cancelled() {
            return RenderAttempt::Done;
        }

        match api.render_output_item(item, element, signal).await {
            Ok(()) => RenderAttempt::Done,
            Err(err) if err.is_fallback() => {
                debug!(
                    renderer_id = %renderer_id,
                    mime = %item.mime,
                    "renderer declined output item"
                );
                RenderAttempt::Declined
            }
            Err(err) => {
                if !signal.is_cancelled() {
                    warn!(renderer_id = %renderer_id, "renderer failed: {err}");
                    element.show_error(OutputErrorBlock::RenderFailed {
                        renderer_id,
                        message: err.message(),
                    });
                }
                RenderAttempt::Done
            }
        }
    }

    fn renderers_extending(&self, id: &str) -> Vec<Arc<Renderer>> {
        self.renderers()
            .values()
            .filter(|renderer| renderer.data.entrypoint.extends.as_deref() == Some(id))
            .cloned()
            .collect()
    }

    fn renderers(&self) -> MutexGuard<'_, IndexMap<String, Arc<Renderer>>> {
        lock(&self.inner.renderers)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
