//! Asynchronous UCI client over a child process
//!
//! Wraps an engine subprocess's standard streams as a line-oriented duplex
//! channel. Outgoing commands flow through an unbounded writer channel; the
//! reader task feeds every trimmed, non-empty line into a [`LineRouter`]
//! that first fans the line out to all observers (passive telemetry sinks)
//! and then resolves the first waiter in FIFO order whose predicate
//! matches. Waiters carry a deadline and an optional request-id tag so a
//! finished handler can mass-cancel anything it left behind.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UciClientError {
    #[error("engine timeout")]
    Timeout,

    #[error("engine stream closed")]
    Closed,

    #[error("failed to spawn engine '{path}': {message}")]
    Spawn { path: String, message: String },
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + 'static>;
type Observer = Box<dyn Fn(&str) + Send + 'static>;

struct Waiter {
    id: u64,
    predicate: Predicate,
    tx: oneshot::Sender<Result<String, UciClientError>>,
    request_tag: Option<String>,
}

/// Synchronous dispatch core shared by the reader task and the client
/// handle. Kept free of process concerns so tests can feed lines directly.
#[derive(Default)]
pub struct LineRouter {
    waiters: Vec<Waiter>,
    observers: HashMap<u64, Observer>,
    next_id: u64,
    closed: bool,
}

impl LineRouter {
    /// Route one raw line: trim, drop empties, fan out to observers, then
    /// resolve the first matching waiter in FIFO order.
    pub fn dispatch(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        for observer in self.observers.values() {
            observer(line);
        }
        if let Some(idx) = self.waiters.iter().position(|w| (w.predicate)(line)) {
            let waiter = self.waiters.remove(idx);
            let _ = waiter.tx.send(Ok(line.to_string()));
        }
    }

    fn register_waiter(
        &mut self,
        predicate: Predicate,
        tx: oneshot::Sender<Result<String, UciClientError>>,
        request_tag: Option<String>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.waiters.push(Waiter {
            id,
            predicate,
            tx,
            request_tag,
        });
        id
    }

    fn remove_waiter(&mut self, id: u64) {
        self.waiters.retain(|w| w.id != id);
    }

    fn add_observer(&mut self, observer: Observer) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.observers.insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: u64) {
        self.observers.remove(&id);
    }

    /// Drop every waiter tagged with `tag`; their receivers observe a
    /// closed channel
    pub fn cancel_request(&mut self, tag: &str) {
        self.waiters
            .retain(|w| w.request_tag.as_deref() != Some(tag));
    }

    /// The stream ended: every pending waiter resolves with `Closed`
    fn close(&mut self) {
        self.closed = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(Err(UciClientError::Closed));
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

/// Handle to one engine subprocess. Cloning shares the channel.
#[derive(Clone)]
pub struct UciClient {
    name: String,
    tx: mpsc::UnboundedSender<String>,
    router: Arc<Mutex<LineRouter>>,
}

impl std::fmt::Debug for UciClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UciClient").field("name", &self.name).finish()
    }
}

impl UciClient {
    /// Spawn the engine binary and wire up the reader/writer tasks
    pub fn spawn(name: &str, path: &str) -> Result<Self, UciClientError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UciClientError::Spawn {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| UciClientError::Spawn {
            path: path.to_string(),
            message: "stdin not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| UciClientError::Spawn {
            path: path.to_string(),
            message: "stdout not piped".to_string(),
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let router = Arc::new(Mutex::new(LineRouter::default()));

        let writer_name = name.to_string();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                debug!(engine = %writer_name, %command, "uci send");
                if stdin.write_all(command.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    warn!(engine = %writer_name, "engine stdin closed");
                    break;
                }
            }
        });

        let reader_router = router.clone();
        let reader_name = name.to_string();
        tokio::spawn(async move {
            // The child handle lives here so the process dies with the task
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(mut router) = reader_router.lock() {
                    router.dispatch(&line);
                }
            }
            warn!(engine = %reader_name, "engine stdout closed");
            if let Ok(mut router) = reader_router.lock() {
                router.close();
            }
        });

        Ok(UciClient {
            name: name.to_string(),
            tx,
            router,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue one command line for the engine
    pub fn send(&self, command: &str) -> Result<(), UciClientError> {
        self.tx
            .send(command.to_string())
            .map_err(|_| UciClientError::Closed)
    }

    /// Register a waiter for the first line matching `predicate` right now,
    /// before any further command is sent, so a fast engine cannot answer
    /// into the void. The optional `tag` associates the waiter with a
    /// request for cleanup.
    pub fn register_wait(
        &self,
        predicate: impl Fn(&str) -> bool + Send + 'static,
        tag: Option<String>,
    ) -> Result<PendingWait, UciClientError> {
        let (tx, rx) = oneshot::channel();
        let mut router = self.router.lock().expect("router lock");
        if router.closed {
            return Err(UciClientError::Closed);
        }
        let waiter_id = router.register_waiter(Box::new(predicate), tx, tag);
        Ok(PendingWait {
            rx,
            waiter_id,
            router: self.router.clone(),
        })
    }

    /// Convenience wrapper: register and await in one step. Only safe when
    /// the matching line cannot arrive before this call.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&str) -> bool + Send + 'static,
        timeout: Duration,
        tag: Option<String>,
    ) -> Result<String, UciClientError> {
        self.register_wait(predicate, tag)?.wait(timeout).await
    }

    /// Install a fan-out callback invoked on every line; returns its id
    pub fn add_observer(&self, observer: impl Fn(&str) + Send + 'static) -> u64 {
        self.router
            .lock()
            .expect("router lock")
            .add_observer(Box::new(observer))
    }

    pub fn remove_observer(&self, id: u64) {
        self.router.lock().expect("router lock").remove_observer(id);
    }

    /// Drop any waiters still tagged with a finished request
    pub fn cancel_request(&self, tag: &str) {
        self.router.lock().expect("router lock").cancel_request(tag);
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.router.lock().expect("router lock").waiter_count()
    }
}

/// A waiter already registered with the router, waiting to be awaited
pub struct PendingWait {
    rx: oneshot::Receiver<Result<String, UciClientError>>,
    waiter_id: u64,
    router: Arc<Mutex<LineRouter>>,
}

impl PendingWait {
    pub async fn wait(self, timeout: Duration) -> Result<String, UciClientError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the waiter was cancelled or the stream closed
            Ok(Err(_)) => Err(UciClientError::Closed),
            Err(_) => {
                self.router
                    .lock()
                    .expect("router lock")
                    .remove_waiter(self.waiter_id);
                Err(UciClientError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collect_channel() -> (
        oneshot::Sender<Result<String, UciClientError>>,
        oneshot::Receiver<Result<String, UciClientError>>,
    ) {
        oneshot::channel()
    }

    #[test]
    fn test_dispatch_resolves_first_matching_waiter() {
        let mut router = LineRouter::default();
        let (tx1, mut rx1) = collect_channel();
        let (tx2, mut rx2) = collect_channel();
        router.register_waiter(Box::new(|l| l.starts_with("bestmove")), tx1, None);
        router.register_waiter(Box::new(|l| l.starts_with("bestmove")), tx2, None);

        router.dispatch("bestmove e2e4");
        assert_eq!(
            rx1.try_recv().expect("first waiter resolved"),
            Ok("bestmove e2e4".to_string())
        );
        assert!(rx2.try_recv().is_err(), "second waiter still pending");
        assert_eq!(router.waiter_count(), 1);

        router.dispatch("bestmove d2d4");
        assert_eq!(
            rx2.try_recv().expect("second waiter resolved"),
            Ok("bestmove d2d4".to_string())
        );
    }

    #[test]
    fn test_dispatch_skips_non_matching_waiters() {
        let mut router = LineRouter::default();
        let (tx1, mut rx1) = collect_channel();
        let (tx2, mut rx2) = collect_channel();
        router.register_waiter(Box::new(|l| l == "readyok"), tx1, None);
        router.register_waiter(Box::new(|l| l.starts_with("bestmove")), tx2, None);

        router.dispatch("bestmove a7a8q");
        assert!(rx1.try_recv().is_err(), "readyok waiter untouched");
        assert_eq!(
            rx2.try_recv().expect("bestmove waiter resolved"),
            Ok("bestmove a7a8q".to_string())
        );
    }

    #[test]
    fn test_observers_see_every_line() {
        let mut router = LineRouter::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        router.add_observer(Box::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));

        router.dispatch("info depth 1");
        router.dispatch("   ");
        router.dispatch("");
        router.dispatch("info depth 2");
        assert_eq!(seen.load(Ordering::SeqCst), 2, "empty lines are dropped");
    }

    #[test]
    fn test_observer_removal() {
        let mut router = LineRouter::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let id = router.add_observer(Box::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));
        router.dispatch("one");
        router.remove_observer(id);
        router.dispatch("two");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_request_drops_tagged_waiters() {
        let mut router = LineRouter::default();
        let (tx1, mut rx1) = collect_channel();
        let (tx2, mut rx2) = collect_channel();
        router.register_waiter(Box::new(|_| true), tx1, Some("req-1".to_string()));
        router.register_waiter(Box::new(|_| true), tx2, Some("req-2".to_string()));

        router.cancel_request("req-1");
        assert_eq!(router.waiter_count(), 1);
        assert!(matches!(
            rx1.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        router.dispatch("anything");
        assert_eq!(rx2.try_recv().expect("survivor"), Ok("anything".to_string()));
    }

    #[test]
    fn test_close_fails_all_waiters() {
        let mut router = LineRouter::default();
        let (tx, mut rx) = collect_channel();
        router.register_waiter(Box::new(|_| true), tx, None);
        router.close();
        assert_eq!(
            rx.try_recv().expect("resolved with error"),
            Err(UciClientError::Closed)
        );
        assert_eq!(router.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_through_cat() {
        // `cat` echoes stdin, which makes it a perfectly obedient engine.
        // The waiter is registered before the send so the echo cannot race it.
        let client = UciClient::spawn("echo", "cat").expect("spawn cat");
        let pending = client
            .register_wait(|l| l == "uciok", None)
            .expect("register");
        client.send("uciok").expect("send");
        let line = pending.wait(Duration::from_secs(5)).await.expect("echoed line");
        assert_eq!(line, "uciok");
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let client = UciClient::spawn("echo", "cat").expect("spawn cat");
        let err = client
            .wait_for(|l| l == "never", Duration::from_millis(80), None)
            .await
            .expect_err("no matching line");
        assert_eq!(err, UciClientError::Timeout);
        assert_eq!(client.waiter_count(), 0, "timed-out waiter is removed");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let err = UciClient::spawn("ghost", "/nonexistent/engine/binary")
            .expect_err("missing binary");
        assert!(matches!(err, UciClientError::Spawn { .. }));
    }
}
