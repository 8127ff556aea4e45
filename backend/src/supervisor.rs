//! Engine supervisor
//!
//! Owns the primary engine client and the optional stronger secondary used
//! for hints. Each client gets its own FIFO task queue so concurrent HTTP
//! requests are serialized per engine and two searches can never interleave
//! commands on one stdin. A permanent observer on the primary attributes
//! `info` telemetry to the currently active request and finalizes it when
//! `bestmove` arrives; per-request state lives in a shared map that status
//! polling reads (and lazily evicts).

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::uci_client::{UciClient, UciClientError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(7_000);
const OPTION_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Finalized request states are dropped this long after completion
const REQUEST_TTL_MS: u64 = 60_000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// FIFO executor: enqueued futures run strictly one at a time, and a
/// panicking task never takes the worker down with it.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl TaskQueue {
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let queue_name = name.to_string();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    warn!(queue = %queue_name, "queued engine task panicked; continuing");
                }
            }
        });
        TaskQueue { tx }
    }

    /// Returns a receiver that resolves once every earlier task finished
    /// and this one ran to completion
    pub fn enqueue<T, F>(&self, task: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(Box::pin(async move {
            let _ = tx.send(task.await);
        }));
        rx
    }
}

/// Score as reported by the engine, `cp` or `mate`
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ScoreInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: i64,
}

/// Fields torn out of one `info` line; token order is arbitrary
#[derive(Debug, Default, Clone)]
pub struct ParsedInfo {
    pub depth: Option<i64>,
    pub multipv: Option<u32>,
    pub score: Option<ScoreInfo>,
    pub pv: Option<Vec<String>>,
}

/// Tokenize an `info` line for depth, multipv, score and pv.
/// Returns `None` for anything that is not an `info` line.
pub fn parse_info_line(line: &str) -> Option<ParsedInfo> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    let mut parsed = ParsedInfo::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => parsed.depth = tokens.next().and_then(|t| t.parse().ok()),
            "multipv" => parsed.multipv = tokens.next().and_then(|t| t.parse().ok()),
            "score" => {
                let kind = tokens.next();
                let value = tokens.next().and_then(|t| t.parse::<i64>().ok());
                if let (Some(kind @ ("cp" | "mate")), Some(value)) = (kind, value) {
                    parsed.score = Some(ScoreInfo {
                        kind: kind.to_string(),
                        value,
                    });
                }
            }
            "pv" => {
                parsed.pv = Some(tokens.by_ref().map(str::to_string).collect());
                break;
            }
            _ => {}
        }
    }
    Some(parsed)
}

/// Mate scores projected onto the centipawn axis for cross-line comparison
pub fn score_as_cp(score: &ScoreInfo) -> i64 {
    if score.kind == "mate" {
        let magnitude = 100_000 - score.value.abs();
        if score.value >= 0 {
            magnitude
        } else {
            -magnitude
        }
    } else {
        score.value
    }
}

/// Lifecycle of one move request: `active -> finalized | errored`
#[derive(Clone, Debug)]
pub struct RequestState {
    pub id: String,
    pub active: bool,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub last_info_at: Option<u64>,
    pub depth: Option<i64>,
    pub score: Option<ScoreInfo>,
    pub pv: String,
    pub bestmove: Option<String>,
    pub bookhit: bool,
    pub error: Option<&'static str>,
}

impl RequestState {
    fn new(id: String) -> Self {
        RequestState {
            id,
            active: true,
            started_at: now_ms(),
            finished_at: None,
            last_info_at: None,
            depth: None,
            score: None,
            pv: String::new(),
            bestmove: None,
            bookhit: false,
            error: None,
        }
    }
}

/// Status-endpoint projection of a request state
#[derive(Serialize, Debug)]
pub struct StatusView {
    pub id: String,
    pub active: bool,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub last_info_at: Option<u64>,
    pub depth: Option<i64>,
    pub score: Option<ScoreInfo>,
    pub pv: String,
    pub bestmove: Option<String>,
    pub terminal: bool,
    pub reason: Option<&'static str>,
    pub error: Option<&'static str>,
}

impl From<&RequestState> for StatusView {
    fn from(state: &RequestState) -> Self {
        let terminal = state.bestmove.as_deref() == Some("0000");
        StatusView {
            id: state.id.clone(),
            active: state.active,
            started_at: state.started_at,
            finished_at: state.finished_at,
            last_info_at: state.last_info_at,
            depth: state.depth,
            score: state.score.clone(),
            pv: state.pv.clone(),
            bestmove: state
                .bestmove
                .clone()
                .filter(|m| m != "0000"),
            terminal,
            reason: if terminal {
                Some(terminal_reason(state.score.as_ref()))
            } else {
                None
            },
            error: state.error,
        }
    }
}

fn terminal_reason(score: Option<&ScoreInfo>) -> &'static str {
    match score {
        Some(score) if score.kind == "mate" => "CHECKMATE",
        _ => "NO_LEGAL_MOVES",
    }
}

#[derive(Default)]
struct CachedOptions {
    hash_mb: Option<u64>,
    multipv: Option<u64>,
}

struct EngineHandle {
    client: UciClient,
    queue: TaskQueue,
    options: Arc<Mutex<CachedOptions>>,
}

#[derive(Debug, Default, Clone)]
pub struct SupervisorConfig {
    pub engine_path: Option<String>,
    pub stockfish_path: Option<String>,
}

type RequestMap = Arc<Mutex<HashMap<String, RequestState>>>;
type ActiveRequest = Arc<Mutex<Option<String>>>;

pub struct Supervisor {
    primary: Option<EngineHandle>,
    secondary: Option<EngineHandle>,
    requests: RequestMap,
    active_request: ActiveRequest,
}

/// Inputs to one move search, already validated and preset-resolved
#[derive(Debug, Clone)]
pub struct MoveParams {
    pub request_id: String,
    pub fen: String,
    pub moves_uci: Option<Vec<String>>,
    pub movetime_ms: u64,
    pub depth: Option<u64>,
    pub hash_mb: u64,
}

#[derive(Serialize, Debug)]
pub struct MoveOutcome {
    pub uci: Option<String>,
    pub terminal: bool,
    pub reason: Option<&'static str>,
    pub depth: Option<i64>,
    pub score: Option<ScoreInfo>,
    pub pv: String,
    pub bookhit: bool,
    pub timeout: bool,
}

#[derive(Debug, Clone)]
pub struct HintParams {
    pub fen: String,
    pub moves_uci: Option<Vec<String>>,
    pub multipv: u64,
    pub movetime_ms: u64,
}

#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HintLine {
    pub uci: String,
    pub score_cp: i64,
    pub pv_moves: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct HintOutcome {
    pub best: Option<String>,
    pub lines: Vec<HintLine>,
    pub timeout: bool,
}

impl Supervisor {
    /// Bring up the configured engines. A missing or unresponsive primary
    /// is logged and leaves subsequent requests failing with ENGINE_ERROR;
    /// a missing secondary only disables hints.
    pub async fn start(config: SupervisorConfig) -> Self {
        let requests: RequestMap = Arc::new(Mutex::new(HashMap::new()));
        let active_request: ActiveRequest = Arc::new(Mutex::new(None));

        let primary = match &config.engine_path {
            Some(path) => match Self::bring_up("engine", path).await {
                Ok(handle) => {
                    info!(%path, "primary engine ready");
                    install_attribution_observer(
                        &handle.client,
                        requests.clone(),
                        active_request.clone(),
                    );
                    Some(handle)
                }
                Err(err) => {
                    warn!(%path, %err, "primary engine unavailable");
                    None
                }
            },
            None => {
                warn!("no engine path configured");
                None
            }
        };

        let secondary = match &config.stockfish_path {
            Some(path) => match Self::bring_up("stockfish", path).await {
                Ok(handle) => {
                    info!(%path, "hint engine ready");
                    Some(handle)
                }
                Err(err) => {
                    warn!(%path, %err, "hint engine unavailable");
                    None
                }
            },
            None => None,
        };

        Supervisor {
            primary,
            secondary,
            requests,
            active_request,
        }
    }

    /// A supervisor with no engine processes; requests fail fast and the
    /// HTTP surface stays testable
    pub fn without_engines() -> Self {
        Supervisor {
            primary: None,
            secondary: None,
            requests: Arc::new(Mutex::new(HashMap::new())),
            active_request: Arc::new(Mutex::new(None)),
        }
    }

    async fn bring_up(name: &str, path: &str) -> Result<EngineHandle, UciClientError> {
        let client = UciClient::spawn(name, path)?;
        let uciok = client.register_wait(|l| l == "uciok", None)?;
        client.send("uci")?;
        uciok.wait(HANDSHAKE_TIMEOUT).await?;
        let readyok = client.register_wait(|l| l == "readyok", None)?;
        client.send("isready")?;
        readyok.wait(HANDSHAKE_TIMEOUT).await?;
        Ok(EngineHandle {
            client,
            queue: TaskQueue::new(name),
            options: Arc::new(Mutex::new(CachedOptions::default())),
        })
    }

    pub fn hint_available(&self) -> bool {
        self.secondary.is_some()
    }

    fn register_request(&self, id: &str) {
        self.requests
            .lock()
            .expect("requests lock")
            .insert(id.to_string(), RequestState::new(id.to_string()));
    }

    fn mark_errored(&self, id: &str, code: &'static str) {
        let mut map = self.requests.lock().expect("requests lock");
        if let Some(state) = map.get_mut(id) {
            state.active = false;
            state.error = Some(code);
            state.finished_at.get_or_insert_with(now_ms);
        }
    }

    fn snapshot(&self, id: &str) -> Option<RequestState> {
        self.requests
            .lock()
            .expect("requests lock")
            .get(id)
            .cloned()
    }

    /// Run one move search on the primary engine queue
    pub async fn run_move(&self, params: MoveParams) -> Result<MoveOutcome, ApiError> {
        let handle = self
            .primary
            .as_ref()
            .ok_or_else(|| ApiError::Engine("primary engine is not running".to_string()))?;

        let request_id = params.request_id.clone();
        self.register_request(&request_id);

        let client = handle.client.clone();
        let options = handle.options.clone();
        let requests = self.requests.clone();
        let active = self.active_request.clone();
        let task_params = params.clone();
        let task_id = request_id.clone();

        let rx = handle.queue.enqueue(async move {
            // From here until bestmove, every primary line belongs to us
            *active.lock().expect("active lock") = Some(task_id.clone());

            let result = drive_move_search(&client, &options, &requests, &task_id, &task_params)
                .await;

            client.cancel_request(&task_id);
            let mut current = active.lock().expect("active lock");
            if current.as_deref() == Some(task_id.as_str()) {
                *current = None;
            }
            result
        });

        let line_result = rx
            .await
            .map_err(|_| ApiError::Engine("engine task queue dropped".to_string()))?;

        match line_result {
            Ok(line) => {
                let mv = line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("")
                    .to_string();
                let state = self.snapshot(&request_id);
                let (depth, score, pv, bookhit) = state
                    .map(|s| (s.depth, s.score, s.pv, s.bookhit))
                    .unwrap_or((None, None, String::new(), false));

                if mv == "0000" {
                    let reason = terminal_reason(score.as_ref());
                    Ok(MoveOutcome {
                        uci: None,
                        terminal: true,
                        reason: Some(reason),
                        depth,
                        score,
                        pv,
                        bookhit,
                        timeout: false,
                    })
                } else {
                    Ok(MoveOutcome {
                        uci: Some(mv),
                        terminal: false,
                        reason: None,
                        depth,
                        score,
                        pv,
                        bookhit,
                        timeout: false,
                    })
                }
            }
            Err(UciClientError::Timeout) => {
                warn!(id = %request_id, "move search timed out");
                self.mark_errored(&request_id, "ENGINE_TIMEOUT");
                let state = self.snapshot(&request_id);
                let (depth, score, pv, bookhit) = state
                    .map(|s| (s.depth, s.score, s.pv, s.bookhit))
                    .unwrap_or((None, None, String::new(), false));
                Ok(MoveOutcome {
                    uci: None,
                    terminal: false,
                    reason: None,
                    depth,
                    score,
                    pv,
                    bookhit,
                    timeout: true,
                })
            }
            Err(err) => {
                self.mark_errored(&request_id, "ENGINE_ERROR");
                Err(ApiError::Engine(err.to_string()))
            }
        }
    }

    /// Run one MultiPV probe on the secondary engine queue
    pub async fn run_hint(&self, params: HintParams) -> Result<HintOutcome, ApiError> {
        let handle = self
            .secondary
            .as_ref()
            .ok_or(ApiError::StockfishUnavailable)?;

        let client = handle.client.clone();
        let options = handle.options.clone();
        let collected: Arc<Mutex<HashMap<u32, HintLine>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink = collected.clone();
        let task_params = params.clone();

        let rx = handle.queue.enqueue(async move {
            drive_hint_search(&client, &options, &sink, &task_params).await
        });

        let line_result = rx
            .await
            .map_err(|_| ApiError::Engine("hint task queue dropped".to_string()))?;

        let mut lines: Vec<(u32, HintLine)> = collected
            .lock()
            .expect("hint lines lock")
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        lines.sort_by_key(|(k, _)| *k);
        let lines: Vec<HintLine> = lines
            .into_iter()
            .take(params.multipv as usize)
            .map(|(_, line)| line)
            .collect();

        match line_result {
            Ok(_) => {
                let best = lines.first().map(|l| l.uci.clone());
                Ok(HintOutcome {
                    best,
                    lines,
                    timeout: false,
                })
            }
            Err(UciClientError::Timeout) => Ok(HintOutcome {
                best: None,
                lines,
                timeout: true,
            }),
            Err(err) => Err(ApiError::Engine(err.to_string())),
        }
    }

    /// Status projection for one request id; stale finalized entries are
    /// evicted on the way
    pub fn status_view(&self, id: &str) -> Option<StatusView> {
        let mut map = self.requests.lock().expect("requests lock");
        let cutoff = now_ms().saturating_sub(REQUEST_TTL_MS);
        map.retain(|_, state| match state.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        map.get(id).map(StatusView::from)
    }

    #[cfg(test)]
    pub(crate) fn requests_for_tests(&self) -> RequestMap {
        self.requests.clone()
    }
}

/// The serialized command/wait conversation of one move request
async fn drive_move_search(
    client: &UciClient,
    options: &Arc<Mutex<CachedOptions>>,
    requests: &RequestMap,
    request_id: &str,
    params: &MoveParams,
) -> Result<String, UciClientError> {
    let hash_changed = {
        let mut cached = options.lock().expect("options lock");
        if cached.hash_mb != Some(params.hash_mb) {
            cached.hash_mb = Some(params.hash_mb);
            true
        } else {
            false
        }
    };
    if hash_changed {
        let readyok =
            client.register_wait(|l| l == "readyok", Some(request_id.to_string()))?;
        client.send(&format!("setoption name Hash value {}", params.hash_mb))?;
        client.send("isready")?;
        readyok.wait(OPTION_TIMEOUT).await?;
    }

    let position_cmd = match &params.moves_uci {
        Some(moves) if !moves.is_empty() => {
            format!("position startpos moves {}", moves.join(" "))
        }
        _ => format!("position fen {}", params.fen),
    };
    client.send(&position_cmd)?;

    let bookhit_observer = {
        let requests = requests.clone();
        let id = request_id.to_string();
        client.add_observer(move |line| {
            if line.starts_with("info string bookhit") {
                if let Some(state) = requests.lock().expect("requests lock").get_mut(&id) {
                    state.bookhit = true;
                }
            }
        })
    };

    let go_cmd = match params.depth {
        Some(depth) => format!("go depth {}", depth),
        None => format!("go movetime {}", params.movetime_ms),
    };
    let wait_ms = std::cmp::max(5_000, params.movetime_ms + 4_000);
    let result = match client.register_wait(
        |l| l.starts_with("bestmove "),
        Some(request_id.to_string()),
    ) {
        Ok(bestmove) => match client.send(&go_cmd) {
            Ok(()) => bestmove.wait(Duration::from_millis(wait_ms)).await,
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    client.remove_observer(bookhit_observer);
    result
}

/// The serialized conversation of one hint request, keeping the latest
/// parsed line per multipv index
async fn drive_hint_search(
    client: &UciClient,
    options: &Arc<Mutex<CachedOptions>>,
    sink: &Arc<Mutex<HashMap<u32, HintLine>>>,
    params: &HintParams,
) -> Result<String, UciClientError> {
    let multipv_changed = {
        let mut cached = options.lock().expect("options lock");
        if cached.multipv != Some(params.multipv) {
            cached.multipv = Some(params.multipv);
            true
        } else {
            false
        }
    };
    let readyok = client.register_wait(|l| l == "readyok", None)?;
    if multipv_changed {
        client.send(&format!("setoption name MultiPV value {}", params.multipv))?;
    }
    client.send("isready")?;
    readyok.wait(OPTION_TIMEOUT).await?;

    let position_cmd = match &params.moves_uci {
        Some(moves) if !moves.is_empty() => {
            format!("position startpos moves {}", moves.join(" "))
        }
        _ => format!("position fen {}", params.fen),
    };
    client.send(&position_cmd)?;

    let observer = {
        let sink = sink.clone();
        client.add_observer(move |line| {
            let Some(parsed) = parse_info_line(line) else { return };
            let (Some(score), Some(pv)) = (parsed.score, parsed.pv) else {
                return;
            };
            let Some(first) = pv.first().cloned() else { return };
            let index = parsed.multipv.unwrap_or(1);
            sink.lock().expect("hint lines lock").insert(
                index,
                HintLine {
                    uci: first,
                    score_cp: score_as_cp(&score),
                    pv_moves: pv,
                },
            );
        })
    };

    let wait_ms = std::cmp::max(5_000, params.movetime_ms + 4_000);
    let result = match client.register_wait(|l| l.starts_with("bestmove "), None) {
        Ok(bestmove) => match client.send(&format!("go movetime {}", params.movetime_ms)) {
            Ok(()) => bestmove.wait(Duration::from_millis(wait_ms)).await,
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    client.remove_observer(observer);
    result
}

/// Permanent primary-engine observer: `info` lines update the active
/// request's telemetry, `bestmove` finalizes it
fn install_attribution_observer(
    client: &UciClient,
    requests: RequestMap,
    active: ActiveRequest,
) {
    client.add_observer(move |line| {
        let Some(id) = active.lock().expect("active lock").clone() else {
            return;
        };

        if let Some(parsed) = parse_info_line(line) {
            if parsed.depth.is_none() && parsed.score.is_none() && parsed.pv.is_none() {
                return;
            }
            let mut map = requests.lock().expect("requests lock");
            if let Some(state) = map.get_mut(&id) {
                state.last_info_at = Some(now_ms());
                if let Some(depth) = parsed.depth {
                    state.depth = Some(depth);
                }
                if let Some(score) = parsed.score {
                    state.score = Some(score);
                }
                if let Some(pv) = parsed.pv {
                    state.pv = pv.join(" ");
                }
            }
        } else if let Some(mv) = line.strip_prefix("bestmove ") {
            let mv = mv.split_whitespace().next().unwrap_or("").to_string();
            {
                let mut map = requests.lock().expect("requests lock");
                if let Some(state) = map.get_mut(&id) {
                    state.bestmove = Some(mv);
                    state.active = false;
                    state.finished_at = Some(now_ms());
                }
            }
            *active.lock().expect("active lock") = None;
        }
    });
}
