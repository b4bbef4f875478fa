//! Rendering runtime for a notebook/chat webview host.
//!
//! Two halves share one surface model (styled terminal lines):
//!
//! - [`notebook`]: renderer lifecycle, per-output serialized render queues,
//!   mimetype fallback, and height negotiation with the host over a JSON
//!   message channel.
//! - [`chat`]: progressive ("typewriter") rendering of streaming responses
//!   and structural reconciliation of rendered content parts.

pub mod chat;
pub mod config;
pub mod logging;
pub mod markdown;
pub mod notebook;

pub use config::{NotebookConfig, ProgressiveRenderConfig, RenderConfig};

/// Compile a static pattern. Each static pattern has a test that forces it.
pub(crate) fn compile_regex(pattern: &str) -> regex::Regex {
    match regex::Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}
