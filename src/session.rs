//! Single-flight inference over a dedicated execution context.
//!
//! The backend lives on its own thread and receives jobs over a channel, so
//! `submit` returns immediately and the caller's frame loop keeps running
//! while the accelerator works. Each job answers on a oneshot channel held
//! by the [`PendingResult`], which can be polled from a frame tick or awaited
//! from async code.
//!
//! A request moves through `Submitted -> {Ready, Failed}`. Before submission
//! the input is a plain [`Tensor`] owned by the caller. The session accepts
//! the next request once the handle has been consumed or discarded and the
//! execution context is done with the job, so at most one job is ever queued.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{self, Tensor};
use crate::errors::{Result, StyleError};
use crate::model::{BackendPreference, ModelDescriptor, OnnxBackend, SessionOptions};
use crate::traits::StyleBackend;

/// Identity of one submitted request, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-blocking view of a request's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Submitted,
    Ready,
    Failed,
}

type Reply = Result<Tensor>;

struct Job {
    id: RequestId,
    input: Tensor,
    reply: oneshot::Sender<Reply>,
    slot: Arc<SlotGuard>,
}

/// Holds the session's single in-flight slot for one request. Shared by the
/// caller's handle and the queued job; the slot clears when both are gone.
struct SlotGuard {
    slot: Arc<Mutex<Option<RequestId>>>,
    id: RequestId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if *slot == Some(self.id) {
            *slot = None;
        }
    }
}

/// Owns a loaded model and the thread that runs it.
///
/// Dropping the session (or calling [`shutdown`](Self::shutdown)) closes the
/// job queue, lets queued work finish and joins the execution context, which
/// releases the backend and everything it allocated.
pub struct InferenceSession {
    backend_name: String,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    slot: Arc<Mutex<Option<RequestId>>>,
    next_id: AtomicU64,
}

impl InferenceSession {
    /// Loads the model onto the requested backend with default options.
    pub fn create(descriptor: &ModelDescriptor, preference: BackendPreference) -> Result<Self> {
        Self::create_with_options(descriptor, preference, &SessionOptions::default())
    }

    pub fn create_with_options(
        descriptor: &ModelDescriptor,
        preference: BackendPreference,
        options: &SessionOptions,
    ) -> Result<Self> {
        let backend = OnnxBackend::load(descriptor, preference, options)?;
        Self::with_backend(backend)
    }

    /// Starts an execution context around an already loaded backend.
    pub fn with_backend<B: StyleBackend>(backend: B) -> Result<Self> {
        let backend_name = backend.name().to_string();
        let (jobs, queue) = mpsc::unbounded_channel();

        let worker = thread::Builder::new()
            .name(format!("{}-exec", backend_name))
            .spawn(move || run_execution_context(backend, queue))
            .map_err(|e| StyleError::model_load("execution context start", e))?;

        debug!(backend = %backend_name, "execution context started");

        Ok(Self {
            backend_name,
            jobs: Some(jobs),
            worker: Some(worker),
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Whether a submitted request still has a live handle or is still
    /// queued or running on the execution context.
    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Hands `input` to the execution context and returns without waiting.
    ///
    /// Fails with `SessionBusy` while an earlier [`PendingResult`] is still
    /// alive or a discarded request has not finished running, and with
    /// `InvalidTensorShape` before anything is queued if the input is not
    /// `[1, H, W, 3]`.
    pub fn submit(&self, input: Tensor) -> Result<PendingResult> {
        let mut slot = self.slot.lock();
        if let Some(pending) = *slot {
            return Err(StyleError::SessionBusy { pending });
        }

        codec::validate_input_shape(input.shape())?;
        let jobs = self.jobs.as_ref().ok_or(StyleError::SessionClosed)?;

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, receiver) = oneshot::channel();
        let shape = input.shape().to_vec();
        let guard = Arc::new(SlotGuard {
            slot: Arc::clone(&self.slot),
            id,
        });

        *slot = Some(id);
        drop(slot);

        // on a closed queue both guard clones drop here and clear the slot
        jobs.send(Job {
            id,
            input,
            reply,
            slot: Arc::clone(&guard),
        })
        .map_err(|_| StyleError::SessionClosed)?;

        debug!(request = %id, ?shape, "submitted");
        Ok(PendingResult {
            id,
            state: RequestState::Submitted,
            reply: receiver,
            outcome: None,
            _slot: guard,
        })
    }

    /// Closes the queue and waits for the execution context to release the backend.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        let Some(jobs) = self.jobs.take() else {
            return;
        };
        drop(jobs);

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(backend = %self.backend_name, "execution context terminated abnormally");
            }
        }
        info!(backend = %self.backend_name, "session released");
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceSession")
            .field("backend", &self.backend_name)
            .field("in_flight", &*self.slot.lock())
            .field("closed", &self.jobs.is_none())
            .finish()
    }
}

/// Handle to an in-flight request.
///
/// Consuming it ([`wait`](Self::wait), [`try_consume`](Self::try_consume)) or
/// discarding it ([`discard`](Self::discard) or drop) gives up the caller's
/// hold on the session slot. A discarded request still runs to completion and
/// keeps the session busy until it does; its output is dropped on the
/// execution context.
#[must_use = "an unconsumed result keeps the session busy"]
pub struct PendingResult {
    id: RequestId,
    state: RequestState,
    reply: oneshot::Receiver<Reply>,
    outcome: Option<Reply>,
    _slot: Arc<SlotGuard>,
}

impl PendingResult {
    pub const fn id(&self) -> RequestId {
        self.id
    }

    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Checks for completion without blocking.
    pub fn poll(&mut self) -> PollStatus {
        if self.state == RequestState::Submitted {
            match self.reply.try_recv() {
                Ok(outcome) => self.settle(outcome),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    let lost = self.lost();
                    self.settle(Err(lost));
                }
            }
        }

        match self.state {
            RequestState::Submitted => PollStatus::Pending,
            RequestState::Ready => PollStatus::Ready,
            RequestState::Failed => PollStatus::Failed,
        }
    }

    /// Takes the output if the request has finished, or hands the handle back.
    pub fn try_consume(mut self) -> std::result::Result<Result<Tensor>, Self> {
        match self.poll() {
            PollStatus::Pending => Err(self),
            PollStatus::Ready | PollStatus::Failed => Ok(self.take_outcome()),
        }
    }

    /// Suspends until the request finishes and returns its output.
    ///
    /// Always yields to the scheduler at least once before the first check,
    /// and waits on the completion channel rather than spinning.
    pub async fn wait(mut self) -> Result<Tensor> {
        tokio::task::yield_now().await;

        if self.poll() == PollStatus::Pending {
            let outcome = match (&mut self.reply).await {
                Ok(outcome) => outcome,
                Err(_) => Err(self.lost()),
            };
            self.settle(outcome);
        }
        self.take_outcome()
    }

    /// Gives up on the request. The slot frees once the execution context is
    /// done with it.
    pub fn discard(self) {
        debug!(request = %self.id, state = ?self.state, "discarded");
    }

    fn settle(&mut self, outcome: Reply) {
        self.state = if outcome.is_ok() {
            RequestState::Ready
        } else {
            RequestState::Failed
        };
        self.outcome = Some(outcome);
    }

    fn take_outcome(&mut self) -> Reply {
        let outcome = self.outcome.take().unwrap_or_else(|| Err(self.lost()));
        debug!(request = %self.id, ok = outcome.is_ok(), "consumed");
        outcome
    }

    fn lost(&self) -> StyleError {
        StyleError::Inference {
            request: self.id,
            source: "execution context dropped the request".into(),
        }
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

fn run_execution_context<B: StyleBackend>(mut backend: B, mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job {
        id,
        input,
        reply,
        slot,
    }) = queue.blocking_recv()
    {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.run(input.view())))
            .unwrap_or_else(|payload| {
                Err(StyleError::Backend {
                    operation: format!("{} run", backend.name()),
                    source: panic_message(payload.as_ref()).into(),
                })
            })
            .map_err(|e| StyleError::Inference {
                request: id,
                source: Box::new(e),
            });
        drop(input);
        // released before replying, so a consumer never sees a stale busy slot
        drop(slot);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(output) => debug!(request = %id, shape = ?output.shape(), elapsed_ms, "inference finished"),
            Err(e) => warn!(request = %id, error = %e, elapsed_ms, "inference failed"),
        }

        if reply.send(outcome).is_err() {
            debug!(request = %id, "result abandoned, output released");
        }
    }

    debug!(backend = backend.name(), "execution context released");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "backend panicked".to_string())
}
