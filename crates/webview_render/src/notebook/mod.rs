//! Notebook output rendering: renderer lifecycle, per-output render queues
//! and height negotiation with the host.

pub mod dimensions;
pub mod element;
pub mod output_item;
pub mod output_runner;
pub mod protocol;
pub mod renderers;
pub mod view_model;

pub use dimensions::{DimensionOptions, DimensionReporter};
pub use element::{OutputElement, OutputErrorBlock};
pub use output_item::{OutputItem, OutputItemRequests};
pub use output_runner::{output_action, OutputAction, OutputRunner};
pub use protocol::{HostMessage, MessageChannel, WebviewMessage};
pub use renderers::{
    ModuleLoader, RendererApi, RendererContext, RendererError, RendererModule, RendererRegistry,
};
pub use view_model::NotebookViewModel;
