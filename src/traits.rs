use ndarray::prelude::*;

use crate::errors::Result;
use crate::pixel_buffer::PixelBuffer;

/// A loaded generator bound to one execution target.
///
/// The session moves the backend onto its execution-context thread, so `run`
/// gets exclusive access and never sees two requests at once.
pub trait StyleBackend: Send + 'static {
    /// Short label used in logs and thread names.
    fn name(&self) -> &str;

    /// Runs the generator on a `[1, H, W, 3]` tensor in `[-1, 1]`.
    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>>;
}

impl StyleBackend for Box<dyn StyleBackend> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        (**self).run(input)
    }
}

/// Supplies frames to the pipeline, polled once per tick.
///
/// `None` means there is nothing new this tick (camera still starting, still
/// image not triggered); the pipeline skips the cycle.
pub trait CaptureSource {
    fn next_frame(&mut self) -> Option<PixelBuffer>;
}

impl<C: CaptureSource + ?Sized> CaptureSource for Box<C> {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        (**self).next_frame()
    }
}

/// A missing device behaves like a source that never produces a frame.
impl<C: CaptureSource> CaptureSource for Option<C> {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        self.as_mut().and_then(CaptureSource::next_frame)
    }
}
