//! JSON message protocol between the webview and its host.
//!
//! Every message is an object tagged by `type`. Inbound messages are
//! [`HostMessage`]s, outbound ones are [`WebviewMessage`]s; both travel over
//! unbounded `async-channel` queues so posting never blocks the renderer.

use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("message channel closed")]
    Closed,
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Messages sent by the host into the webview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "html", rename_all = "camelCase")]
    Html {
        cell_id: String,
        output_id: String,
        top: f64,
        content: OutputContent,
        #[serde(default)]
        create_on_idle: bool,
    },
    #[serde(rename = "showOutput", rename_all = "camelCase")]
    ShowOutput {
        cell_id: String,
        output_id: String,
        top: f64,
    },
    #[serde(rename = "hideOutput", rename_all = "camelCase")]
    HideOutput { cell_id: String, output_id: String },
    #[serde(rename = "clearOutput", rename_all = "camelCase")]
    ClearOutput {
        cell_id: String,
        output_id: String,
        #[serde(default)]
        renderer_id: Option<String>,
    },
    #[serde(rename = "ack-dimension")]
    AckDimension { updates: Vec<DimensionAck> },
    #[serde(rename = "preload")]
    Preload { resources: Vec<PreloadResource> },
    #[serde(rename = "updateRenderers")]
    UpdateRenderers { renderers: Vec<RendererDescriptor> },
    #[serde(rename = "returnOutputItem", rename_all = "camelCase")]
    ReturnOutputItem {
        request_id: u32,
        output: Option<OutputItemPayload>,
    },
    #[serde(rename = "createMarkupCell")]
    CreateMarkupCell { cell: MarkupCellInit },
    #[serde(rename = "updateMarkupCell")]
    UpdateMarkupCell { id: String, content: String },
    #[serde(rename = "showMarkupCell")]
    ShowMarkupCell {
        id: String,
        top: f64,
        #[serde(default)]
        content: Option<String>,
    },
    #[serde(rename = "hideMarkupCells")]
    HideMarkupCells { ids: Vec<String> },
    #[serde(rename = "deleteMarkupCell")]
    DeleteMarkupCell { ids: Vec<String> },
}

/// Messages sent by the webview to its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebviewMessage {
    #[serde(rename = "initialized")]
    Initialized,
    #[serde(rename = "dimension")]
    Dimension { updates: Vec<DimensionUpdate> },
    #[serde(rename = "getOutputItem", rename_all = "camelCase")]
    GetOutputItem {
        request_id: u32,
        output_id: String,
        mime: String,
    },
    #[serde(rename = "customRendererMessage", rename_all = "camelCase")]
    CustomRendererMessage {
        renderer_id: String,
        message: serde_json::Value,
    },
    #[serde(rename = "rendererActivationFailed", rename_all = "camelCase")]
    RendererActivationFailed { renderer_id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputContent {
    /// Pre-rendered markup from the host; shown as plain text lines.
    #[serde(rename = "html", rename_all = "camelCase")]
    Html { html_content: String },
    /// An output item to hand to a renderer.
    #[serde(rename = "renderer", rename_all = "camelCase")]
    Renderer {
        #[serde(default)]
        renderer_id: Option<String>,
        output: OutputItemPayload,
        /// Every mimetype the output is available in, in preference order.
        #[serde(default)]
        all_output_mimes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItemPayload {
    pub mime: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererDescriptor {
    pub id: String,
    pub mime_types: Vec<String>,
    pub entrypoint: RendererEntrypoint,
    #[serde(default)]
    pub messaging: bool,
    #[serde(default)]
    pub is_builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererEntrypoint {
    pub path: String,
    /// Id of the renderer this one extends, if any.
    #[serde(default)]
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadResource {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupCellInit {
    pub id: String,
    pub content: String,
    pub top: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionAck {
    pub cell_id: String,
    pub output_id: String,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionUpdate {
    pub id: String,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_output: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
}

/// Webview-side posting handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MessageChannel {
    outbound: Sender<WebviewMessage>,
}

/// Host-side ends of a connected channel pair.
pub struct HostEndpoint {
    pub to_webview: Sender<HostMessage>,
    pub from_webview: Receiver<WebviewMessage>,
}

impl MessageChannel {
    /// Connect a webview to a host. Returns the webview's posting handle, the
    /// webview's inbound receiver, and the host's ends.
    pub fn connect() -> (MessageChannel, Receiver<HostMessage>, HostEndpoint) {
        let (outbound, from_webview) = async_channel::unbounded();
        let (to_webview, inbound) = async_channel::unbounded();
        (
            MessageChannel { outbound },
            inbound,
            HostEndpoint {
                to_webview,
                from_webview,
            },
        )
    }

    pub fn post_message(&self, message: WebviewMessage) -> Result<(), ChannelError> {
        self.outbound
            .try_send(message)
            .map_err(|_| ChannelError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

pub fn decode_host_message(raw: &str) -> Result<HostMessage, ChannelError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_webview_message(message: &WebviewMessage) -> Result<String, ChannelError> {
    Ok(serde_json::to_string(message)?)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
