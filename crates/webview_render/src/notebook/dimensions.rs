//! Coalesces height updates into one `dimension` message per scheduler turn.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tracing::{trace, warn};

use super::protocol::{DimensionUpdate, MessageChannel, WebviewMessage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionOptions {
    pub is_output: bool,
    pub init: bool,
}

#[derive(Default)]
struct PendingDimensions {
    updates: IndexMap<String, DimensionUpdate>,
    flush_scheduled: bool,
}

#[derive(Clone)]
pub struct DimensionReporter {
    pending: Arc<Mutex<PendingDimensions>>,
    channel: MessageChannel,
}

impl DimensionReporter {
    pub fn new(channel: MessageChannel) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingDimensions::default())),
            channel,
        }
    }

    /// Record a height for `id`. The first update after a flush schedules the
    /// next flush; later updates in the same turn only overwrite.
    ///
    /// Must be called from within a tokio runtime.
    pub fn update_height(&self, id: &str, height: f64, options: DimensionOptions) {
        let schedule = {
            let mut pending = self.lock();
            let update = match pending.updates.get(id) {
                // An output's first report carries `isOutput`/`init`; a later
                // plain update in the same turn must not drop them.
                Some(current) if current.is_output == Some(true) => DimensionUpdate {
                    id: id.to_string(),
                    height,
                    is_output: current.is_output,
                    init: current.init,
                },
                _ => DimensionUpdate {
                    id: id.to_string(),
                    height,
                    is_output: options.is_output.then_some(true),
                    init: options.init.then_some(true),
                },
            };
            pending.updates.insert(id.to_string(), update);

            if pending.flush_scheduled {
                false
            } else {
                pending.flush_scheduled = true;
                true
            }
        };

        if schedule {
            let reporter = self.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                reporter.update_immediately();
            });
        }
    }

    /// Send every pending update as one batched message.
    pub fn update_immediately(&self) {
        let updates: Vec<DimensionUpdate> = {
            let mut pending = self.lock();
            pending.flush_scheduled = false;
            pending.updates.drain(..).map(|(_, update)| update).collect()
        };
        if updates.is_empty() {
            return;
        }

        trace!(count = updates.len(), "flushing dimension updates");
        if let Err(err) = self
            .channel
            .post_message(WebviewMessage::Dimension { updates })
        {
            warn!("failed to post dimension updates: {err}");
        }
    }

    pub fn pending_len(&self) -> usize {
        self.lock().updates.len()
    }

    fn lock(&self) -> MutexGuard<'_, PendingDimensions> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
