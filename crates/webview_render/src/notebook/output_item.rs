use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::protocol::{MessageChannel, OutputItemPayload, WebviewMessage};

/// One mimetype representation of an output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputItem {
    pub output_id: String,
    pub mime: String,
    pub metadata: serde_json::Value,
    pub data: Arc<[u8]>,
    /// Every mimetype the output is available in, including this one.
    pub all_mimes: Arc<[String]>,
}

impl OutputItem {
    pub fn from_payload(
        output_id: &str,
        payload: OutputItemPayload,
        all_mimes: Arc<[String]>,
    ) -> Self {
        Self {
            output_id: output_id.to_string(),
            mime: payload.mime,
            metadata: payload.metadata,
            data: payload.data.into(),
            all_mimes,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Other representations of the same output, in host preference order.
    pub fn alternate_mimes(&self) -> impl Iterator<Item = &str> {
        self.all_mimes
            .iter()
            .map(String::as_str)
            .filter(move |mime| *mime != self.mime)
    }
}

type FetchFuture = Shared<BoxFuture<'static, Option<OutputItem>>>;

#[derive(Default)]
struct RequestState {
    next_request_id: u32,
    pending: HashMap<u32, oneshot::Sender<Option<OutputItemPayload>>>,
    fetched: HashMap<(String, String), FetchFuture>,
}

/// Fetches alternate output representations from the host.
///
/// Each fetch is a `getOutputItem` request answered by `returnOutputItem`
/// with the same `requestId`. Results are memoized per `(outputId, mime)`.
#[derive(Clone)]
pub struct OutputItemRequests {
    state: Arc<Mutex<RequestState>>,
    channel: MessageChannel,
}

impl OutputItemRequests {
    pub fn new(channel: MessageChannel) -> Self {
        Self {
            state: Arc::new(Mutex::new(RequestState::default())),
            channel,
        }
    }

    pub async fn fetch(&self, item: &OutputItem, mime: &str) -> Option<OutputItem> {
        let key = (item.output_id.clone(), mime.to_string());
        let fetch = {
            let mut state = self.lock();
            if let Some(existing) = state.fetched.get(&key) {
                existing.clone()
            } else {
                let fetch = self.start_request(&mut state, item, mime);
                state.fetched.insert(key, fetch.clone());
                fetch
            }
        };
        fetch.await
    }

    /// Complete the request `request_id` with the host's answer.
    pub fn resolve(&self, request_id: u32, output: Option<OutputItemPayload>) {
        let sender = self.lock().pending.remove(&request_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(output);
            }
            None => debug!(request_id, "ignoring output item for unknown request"),
        }
    }

    /// Drop memoized representations of a cleared output.
    pub fn forget_output(&self, output_id: &str) {
        self.lock()
            .fetched
            .retain(|(fetched_output, _), _| fetched_output != output_id);
    }

    pub fn pending_requests(&self) -> usize {
        self.lock().pending.len()
    }

    fn start_request(
        &self,
        state: &mut RequestState,
        item: &OutputItem,
        mime: &str,
    ) -> FetchFuture {
        let request_id = state.next_request_id;
        state.next_request_id = state.next_request_id.wrapping_add(1);

        let (sender, receiver) = oneshot::channel();
        let message = WebviewMessage::GetOutputItem {
            request_id,
            output_id: item.output_id.clone(),
            mime: mime.to_string(),
        };
        match self.channel.post_message(message) {
            Ok(()) => {
                state.pending.insert(request_id, sender);
            }
            // Dropping the sender resolves the fetch as unavailable.
            Err(err) => warn!("failed to request output item {}: {err}", item.output_id),
        }

        let output_id = item.output_id.clone();
        let all_mimes = item.all_mimes.clone();
        async move {
            let payload = receiver.await.ok().flatten()?;
            Some(OutputItem::from_payload(&output_id, payload, all_mimes))
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(mimes: &[&str]) -> OutputItem {
        OutputItem::from_payload(
            "out1",
            OutputItemPayload {
                mime: mimes[0].to_string(),
                data: b"{\"a\": 1}".to_vec(),
                metadata: serde_json::Value::Null,
            },
            mimes.iter().map(|m| m.to_string()).collect(),
        )
    }

    #[test]
    fn alternates_exclude_current_mime() {
        let item = item(&["application/json", "text/plain", "text/html"]);
        assert_eq!(
            item.alternate_mimes().collect::<Vec<_>>(),
            vec!["text/plain", "text/html"]
        );
        assert_eq!(item.json().unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_request() {
        let (channel, _inbound, host) = MessageChannel::connect();
        let requests = OutputItemRequests::new(channel);
        let source = item(&["application/json", "text/plain"]);

        let responder = {
            let requests = requests.clone();
            async move {
                let message = host.from_webview.recv().await.unwrap();
                let WebviewMessage::GetOutputItem { request_id, mime, .. } = message else {
                    panic!("unexpected message {message:?}");
                };
                requests.resolve(
                    request_id,
                    Some(OutputItemPayload {
                        mime,
                        data: b"plain".to_vec(),
                        metadata: serde_json::Value::Null,
                    }),
                );
                host
            }
        };

        let (first, second, host) = tokio::join!(
            requests.fetch(&source, "text/plain"),
            requests.fetch(&source, "text/plain"),
            responder
        );
        let first = first.unwrap();
        assert_eq!(first.text(), "plain");
        assert_eq!(Some(first), second);
        assert!(host.from_webview.try_recv().is_err());

        // Repeat fetch is served from the memo without a new request.
        assert!(requests.fetch(&source, "text/plain").await.is_some());
        assert!(host.from_webview.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_output_resolves_to_none() {
        let (channel, _inbound, host) = MessageChannel::connect();
        let requests = OutputItemRequests::new(channel);
        let source = item(&["application/json", "text/plain"]);

        let responder = async {
            if let Ok(WebviewMessage::GetOutputItem { request_id, .. }) =
                host.from_webview.recv().await
            {
                requests.resolve(request_id, None);
            }
        };
        let (fetched, ()) = tokio::join!(requests.fetch(&source, "text/plain"), responder);
        assert!(fetched.is_none());
        assert_eq!(requests.pending_requests(), 0);
    }

    #[tokio::test]
    async fn closed_channel_resolves_to_none() {
        let (channel, _inbound, host) = MessageChannel::connect();
        drop(host);
        let requests = OutputItemRequests::new(channel);
        assert!(requests
            .fetch(&item(&["a/b", "c/d"]), "c/d")
            .await
            .is_none());
    }
}
