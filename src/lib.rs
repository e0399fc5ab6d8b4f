//! Real-time AnimeGANv3 style transfer.
//!
//! Frames from a [`CaptureSource`] are encoded into `[1, H, W, 3]` tensors
//! normalized to `[-1, 1]`, run through a generator on an
//! [`InferenceSession`] without blocking the caller, and decoded back into
//! opaque RGBA [`PixelBuffer`]s for presentation.
//!
//! ```no_run
//! use animegan_rs::{BackendPreference, InferenceSession, ModelDescriptor, PixelBuffer};
//!
//! # async fn demo(frame: PixelBuffer) -> animegan_rs::Result<()> {
//! let session = InferenceSession::create(
//!     &ModelDescriptor::file("AnimeGANv3_Hayao_36.onnx"),
//!     BackendPreference::Accelerator { device_id: 0 },
//! )?;
//! let styled = animegan_rs::stylize(&session, &frame).await?;
//! # let _ = styled;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod errors;
pub mod model;
pub mod pipeline;
pub mod pixel_buffer;
pub mod session;
pub mod traits;

pub mod mocks;

pub use capture::{
    frame_channel, open_camera, select_device, CameraRequest, CameraStream, DeviceInfo,
    FrameSender, StillImageSource, StreamSource,
};
pub use codec::{decode, encode, Tensor};
pub use config::Config;
pub use errors::{Result, StyleError};
pub use model::{BackendPreference, ModelDescriptor, OnnxBackend, SessionOptions};
pub use pipeline::{stylize, PipelineStats, StylePipeline, TickOutcome};
pub use pixel_buffer::{ChannelLayout, PixelBuffer};
pub use session::{InferenceSession, PendingResult, PollStatus, RequestId, RequestState};
pub use traits::*;
