//! Per-output serialized render queues with cooperative cancellation.
//!
//! Each output id owns at most one worker task. Actions submitted for the
//! same id run strictly in submission order and never overlap; different
//! ids are independent. Cancelling an id aborts its token: queued actions
//! are skipped, an in-flight action only stops if it checks the token.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type OutputAction =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Box an async closure as an [`OutputAction`].
pub fn output_action<F, Fut>(f: F) -> OutputAction
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |signal| f(signal).boxed())
}

struct OutputTask {
    abort: CancellationToken,
    queue: mpsc::UnboundedSender<OutputAction>,
}

struct PendingIdleRequest {
    handle: u64,
    token: CancellationToken,
}

impl PendingIdleRequest {
    fn dispose(&self) {
        self.token.cancel();
    }
}

#[derive(Default)]
struct RunnerState {
    outputs: HashMap<String, OutputTask>,
    pending_idle: HashMap<String, PendingIdleRequest>,
}

#[derive(Clone)]
pub struct OutputRunner {
    state: Arc<Mutex<RunnerState>>,
    idle: Arc<Notify>,
    next_idle_handle: Arc<AtomicU64>,
    idle_timeout: Duration,
}

impl OutputRunner {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RunnerState::default())),
            idle: Arc::new(Notify::new()),
            next_idle_handle: Arc::new(AtomicU64::new(0)),
            idle_timeout,
        }
    }

    /// Queue `action` behind any work already pending for `output_id`.
    ///
    /// Supersedes a pending idle request for the same id. Must be called from
    /// within a tokio runtime.
    pub fn enqueue(&self, output_id: &str, action: OutputAction) {
        let mut state = self.lock();
        if let Some(idle) = state.pending_idle.remove(output_id) {
            idle.dispose();
        }
        Self::enqueue_locked(&mut state, output_id, action);
    }

    /// Queue `action` once the host is idle, or after the idle timeout.
    /// Any later `enqueue`/`enqueue_idle`/`cancel_output` for the id drops it
    /// unrun.
    pub fn enqueue_idle(&self, output_id: &str, action: OutputAction) {
        let handle = self.next_idle_handle.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut state = self.lock();
            let request = PendingIdleRequest {
                handle,
                token: token.clone(),
            };
            if let Some(previous) = state.pending_idle.insert(output_id.to_string(), request) {
                previous.dispose();
            }
        }

        let runner = self.clone();
        let output_id = output_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = runner.wait_for_idle() => {}
            }
            runner.fire_idle(&output_id, handle, action);
        });
    }

    /// Signal that the host has spare time; pending idle requests run now.
    pub fn notify_idle(&self) {
        self.idle.notify_waiters();
    }

    pub fn cancel_output(&self, output_id: &str) {
        let mut state = self.lock();
        if let Some(idle) = state.pending_idle.remove(output_id) {
            idle.dispose();
        }
        if let Some(task) = state.outputs.remove(output_id) {
            debug!(output_id, "cancelling output render queue");
            task.abort.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let mut state = self.lock();
        for (_, idle) in state.pending_idle.drain() {
            idle.dispose();
        }
        for (_, task) in state.outputs.drain() {
            task.abort.cancel();
        }
    }

    pub fn has_task(&self, output_id: &str) -> bool {
        self.lock().outputs.contains_key(output_id)
    }

    pub fn has_pending_idle(&self, output_id: &str) -> bool {
        self.lock().pending_idle.contains_key(output_id)
    }

    fn enqueue_locked(state: &mut RunnerState, output_id: &str, action: OutputAction) {
        let action = match state.outputs.get(output_id) {
            Some(task) => match task.queue.send(action) {
                Ok(()) => return,
                // Worker exited; start over with a fresh task.
                Err(mpsc::error::SendError(action)) => action,
            },
            None => action,
        };

        let abort = CancellationToken::new();
        let (queue, actions) = mpsc::unbounded_channel();
        let _ = queue.send(action);
        tokio::spawn(run_output_queue(
            output_id.to_string(),
            abort.clone(),
            actions,
        ));
        state
            .outputs
            .insert(output_id.to_string(), OutputTask { abort, queue });
    }

    fn fire_idle(&self, output_id: &str, handle: u64, action: OutputAction) {
        let mut state = self.lock();
        match state.pending_idle.get(output_id) {
            Some(request) if request.handle == handle && !request.token.is_cancelled() => {
                state.pending_idle.remove(output_id);
            }
            _ => return,
        }
        Self::enqueue_locked(&mut state, output_id, action);
    }

    async fn wait_for_idle(&self) {
        tokio::select! {
            _ = self.idle.notified() => {}
            _ = tokio::time::sleep(self.idle_timeout) => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_output_queue(
    output_id: String,
    abort: CancellationToken,
    mut actions: mpsc::UnboundedReceiver<OutputAction>,
) {
    loop {
        let action = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            next = actions.recv() => match next {
                Some(action) => action,
                None => break,
            },
        };
        if abort.is_cancelled() {
            break;
        }
        // A failing render must not poison later updates for this output.
        if let Err(err) = action(abort.clone()).await {
            warn!(output_id = %output_id, "output render action failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn recording(log: &Log, entry: &'static str) -> OutputAction {
        let log = log.clone();
        output_action(move |_| async move {
            record(&log, entry);
            Ok(())
        })
    }

    fn done_signal(tx: oneshot::Sender<()>) -> OutputAction {
        output_action(move |_| async move {
            let _ = tx.send(());
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn actions_run_in_submission_order() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let events = log();
        let start = Instant::now();

        let a_log = events.clone();
        runner.enqueue(
            "out1",
            output_action(move |_| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                record(&a_log, "A");
                Ok(())
            }),
        );
        runner.enqueue("out1", recording(&events, "B"));
        runner.enqueue("out1", recording(&events, "C"));
        let (tx, rx) = oneshot::channel();
        runner.enqueue("out1", done_signal(tx));
        rx.await.unwrap();

        assert_eq!(entries(&events), vec!["A", "B", "C"]);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn actions_never_overlap() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let events = log();
        for (i, delay) in [30u64, 5, 20, 0, 10].into_iter().enumerate() {
            let events = events.clone();
            runner.enqueue(
                "out",
                output_action(move |_| async move {
                    record(&events, format!("start{i}"));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    record(&events, format!("end{i}"));
                    Ok(())
                }),
            );
        }
        let (tx, rx) = oneshot::channel();
        runner.enqueue("out", done_signal(tx));
        rx.await.unwrap();

        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start{i}"), format!("end{i}")])
            .collect();
        assert_eq!(entries(&events), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_skips_queued_actions() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let events = log();

        let a_log = events.clone();
        runner.enqueue(
            "out1",
            output_action(move |signal| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if !signal.is_cancelled() {
                    record(&a_log, "A");
                }
                Ok(())
            }),
        );
        runner.enqueue("out1", recording(&events, "B"));
        runner.cancel_output("out1");
        assert!(!runner.has_task("out1"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(entries(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_after_cancel_starts_fresh_queue() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let events = log();

        runner.enqueue(
            "out1",
            output_action(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        );
        runner.cancel_output("out1");

        runner.enqueue("out1", recording(&events, "fresh"));
        let (tx, rx) = oneshot::channel();
        runner.enqueue("out1", done_signal(tx));
        let start = Instant::now();
        rx.await.unwrap();

        assert_eq!(entries(&events), vec!["fresh"]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failing_action_does_not_block_followers() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let events = log();
        runner.enqueue(
            "out",
            output_action(|_| async { Err(anyhow::anyhow!("renderer exploded")) }),
        );
        runner.enqueue("out", recording(&events, "after"));
        let (tx, rx) = oneshot::channel();
        runner.enqueue("out", done_signal(tx));
        rx.await.unwrap();
        assert_eq!(entries(&events), vec!["after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_request_runs_after_timeout() {
        let runner = OutputRunner::new(Duration::from_millis(300));
        let (tx, rx) = oneshot::channel();
        let start = Instant::now();
        runner.enqueue_idle("out", done_signal(tx));
        assert!(runner.has_pending_idle("out"));
        rx.await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(!runner.has_pending_idle("out"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_notification_runs_request_early() {
        let runner = OutputRunner::new(Duration::from_secs(60));
        let (tx, rx) = oneshot::channel();
        let start = Instant::now();
        runner.enqueue_idle("out", done_signal(tx));
        tokio::task::yield_now().await;
        runner.notify_idle();
        rx.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn direct_enqueue_supersedes_idle_request() {
        let runner = OutputRunner::new(Duration::from_millis(100));
        let events = log();
        runner.enqueue_idle("out", recording(&events, "idle"));
        runner.enqueue("out", recording(&events, "direct"));
        assert!(!runner.has_pending_idle("out"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(entries(&events), vec!["direct"]);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_idle_request_replaces_older() {
        let runner = OutputRunner::new(Duration::from_millis(100));
        let events = log();
        runner.enqueue_idle("out", recording(&events, "first"));
        runner.enqueue_idle("out", recording(&events, "second"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(entries(&events), vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_drops_idle_and_queued_work() {
        let runner = OutputRunner::new(Duration::from_millis(100));
        let events = log();
        runner.enqueue_idle("a", recording(&events, "idle-a"));
        runner.enqueue(
            "b",
            output_action(|_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }),
        );
        runner.enqueue("b", recording(&events, "queued-b"));
        runner.cancel_all();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(entries(&events).is_empty());
        assert!(!runner.has_task("b"));
    }
}
