//! Frame-driven orchestration: capture, encode, submit, poll, decode, present.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{self, Tensor};
use crate::errors::{Result, StyleError};
use crate::pixel_buffer::PixelBuffer;
use crate::session::{InferenceSession, PendingResult, RequestId};
use crate::traits::CaptureSource;

/// What a single [`StylePipeline::tick`] did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The source had nothing new; the cycle was skipped.
    NoFrame,
    Submitted(RequestId),
    /// The request is still running on the backend.
    Waiting(RequestId),
    /// A new stylized frame replaced the presented one.
    Presented(RequestId),
    /// Nothing was presented; the previous frame stays on screen.
    Failed {
        request: Option<RequestId>,
        error: StyleError,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub presented: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// One capture source feeding one session.
///
/// Only one request is in flight at a time. While it runs the source is not
/// polled, so a still image stays armed and a camera stream keeps only its
/// newest frame for the next cycle.
pub struct StylePipeline<C> {
    session: InferenceSession,
    source: C,
    in_flight: Option<PendingResult>,
    latest: Option<PixelBuffer>,
    stats: PipelineStats,
}

impl<C: CaptureSource> StylePipeline<C> {
    pub const fn new(session: InferenceSession, source: C) -> Self {
        Self {
            session,
            source,
            in_flight: None,
            latest: None,
            stats: PipelineStats {
                submitted: 0,
                presented: 0,
                failed: 0,
                skipped: 0,
            },
        }
    }

    /// Advances the pipeline by one host frame. Never blocks.
    pub fn tick(&mut self) -> TickOutcome {
        if let Some(pending) = self.in_flight.take() {
            let request = pending.id();
            return match pending.try_consume() {
                Err(pending) => {
                    self.in_flight = Some(pending);
                    TickOutcome::Waiting(request)
                }
                Ok(outcome) => self.present(request, outcome),
            };
        }

        let Some(frame) = self.source.next_frame() else {
            self.stats.skipped += 1;
            return TickOutcome::NoFrame;
        };

        match codec::encode(&frame).and_then(|tensor| self.session.submit(tensor)) {
            Ok(pending) => {
                let request = pending.id();
                self.in_flight = Some(pending);
                self.stats.submitted += 1;
                TickOutcome::Submitted(request)
            }
            Err(error) => {
                warn!(%error, "frame rejected, keeping previous output");
                self.stats.failed += 1;
                TickOutcome::Failed {
                    request: None,
                    error,
                }
            }
        }
    }

    fn present(&mut self, request: RequestId, outcome: Result<Tensor>) -> TickOutcome {
        match outcome.and_then(|output| codec::decode(&output)) {
            Ok(frame) => {
                debug!(request = %request, width = frame.width(), height = frame.height(), "presenting");
                self.latest = Some(frame);
                self.stats.presented += 1;
                TickOutcome::Presented(request)
            }
            Err(error) => {
                warn!(request = %request, %error, "inference failed, keeping previous output");
                self.stats.failed += 1;
                TickOutcome::Failed {
                    request: Some(request),
                    error,
                }
            }
        }
    }

    /// Drives [`tick`](Self::tick) from its own timer until `cancel` fires,
    /// handing every newly presented frame to `present`.
    pub async fn run<F>(
        &mut self,
        frame_interval: Duration,
        cancel: CancellationToken,
        mut present: F,
    ) -> PipelineStats
    where
        F: FnMut(&PixelBuffer),
    {
        let mut ticker = interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let TickOutcome::Presented(_) = self.tick() {
                        if let Some(frame) = &self.latest {
                            present(frame);
                        }
                    }
                }
            }
        }

        if let Some(pending) = self.in_flight.take() {
            pending.discard();
        }
        self.stats
    }

    /// Stylizes one frame outside the tick cycle. Fails with `SessionBusy`
    /// while a ticked request is still in flight.
    pub async fn stylize(&self, frame: &PixelBuffer) -> Result<PixelBuffer> {
        stylize(&self.session, frame).await
    }

    /// The most recently presented frame.
    pub const fn latest(&self) -> Option<&PixelBuffer> {
        self.latest.as_ref()
    }

    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub const fn is_waiting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub const fn session(&self) -> &InferenceSession {
        &self.session
    }

    pub fn source_mut(&mut self) -> &mut C {
        &mut self.source
    }

    /// Discards any in-flight request and hands back the parts.
    pub fn into_parts(mut self) -> (InferenceSession, C) {
        if let Some(pending) = self.in_flight.take() {
            pending.discard();
        }
        (self.session, self.source)
    }
}

/// Encodes, submits, awaits and decodes a single frame.
pub async fn stylize(session: &InferenceSession, frame: &PixelBuffer) -> Result<PixelBuffer> {
    let input = codec::encode(frame)?;
    let output = session.submit(input)?.wait().await?;
    codec::decode(&output)
}
