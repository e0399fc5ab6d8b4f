//! Frame sources for the pipeline: a still picture and a latest-frame camera stream.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::{Result, StyleError};
use crate::pixel_buffer::{ChannelLayout, PixelBuffer};
use crate::traits::CaptureSource;

/// A static picture emitted once per trigger.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    frame: PixelBuffer,
    armed: bool,
}

impl StillImageSource {
    /// The first poll yields the frame; later polls yield nothing until
    /// [`trigger`](Self::trigger) is called again.
    pub const fn new(frame: PixelBuffer) -> Self {
        Self { frame, armed: true }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(|e| StyleError::ImageProcessing {
            path: path.display().to_string(),
            operation: "image load".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self::new(PixelBuffer::from(image)))
    }

    pub fn trigger(&mut self) {
        self.armed = true;
    }

    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    pub const fn frame(&self) -> &PixelBuffer {
        &self.frame
    }
}

impl CaptureSource for StillImageSource {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        if !self.armed {
            return None;
        }
        self.armed = false;
        Some(self.frame.clone())
    }
}

/// Creates a camera stream pair. The device side pushes frames into the
/// sender; the pipeline polls the source and only ever sees the newest one.
pub fn frame_channel() -> (FrameSender, StreamSource) {
    let (tx, rx) = watch::channel(None);
    (FrameSender { tx }, StreamSource { rx })
}

/// Producer half of a camera stream, owned by the device thread.
#[derive(Debug)]
pub struct FrameSender {
    tx: watch::Sender<Option<PixelBuffer>>,
}

impl FrameSender {
    /// Replaces the latest frame. Returns `false` once the source is gone.
    pub fn push(&self, frame: PixelBuffer) -> bool {
        self.tx.send(Some(frame)).is_ok()
    }

    /// Pushes a raw RGBA32 frame as delivered by most camera APIs.
    pub fn push_rgba(&self, width: u32, height: u32, data: Vec<u8>) -> Result<bool> {
        let frame = PixelBuffer::new(width, height, ChannelLayout::Rgba, data)?;
        Ok(self.push(frame))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a camera stream.
#[derive(Debug, Clone)]
pub struct StreamSource {
    rx: watch::Receiver<Option<PixelBuffer>>,
}

impl CaptureSource for StreamSource {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        // the last frame stays readable after the device side has stopped
        let latest = self.rx.borrow_and_update();
        if latest.has_changed() {
            (*latest).clone()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Requested camera configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            frame_rate: 30,
        }
    }
}

impl CameraRequest {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

/// Picks the requested device. An empty list or a bad index means "no
/// source", which is logged and left for the caller to tolerate.
pub fn select_device<'a>(
    devices: &'a [DeviceInfo],
    request: &CameraRequest,
) -> Option<&'a DeviceInfo> {
    let device = devices.get(request.device_index);
    match device {
        Some(device) => info!(
            device = %device.name,
            width = request.width,
            height = request.height,
            frame_rate = request.frame_rate,
            "camera selected"
        ),
        None if devices.is_empty() => warn!("no camera device found"),
        None => warn!(
            index = request.device_index,
            available = devices.len(),
            "camera index out of range"
        ),
    }
    device
}

/// A selected device together with both halves of its frame stream.
#[derive(Debug)]
pub struct CameraStream {
    pub device: DeviceInfo,
    pub request: CameraRequest,
    pub sender: FrameSender,
    pub source: StreamSource,
}

/// Selects a device and opens a stream for it, or `None` when no device fits.
pub fn open_camera(devices: &[DeviceInfo], request: CameraRequest) -> Option<CameraStream> {
    let device = select_device(devices, &request)?.clone();
    let (sender, source) = frame_channel();
    Some(CameraStream {
        device,
        request,
        sender,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(level: u8) -> PixelBuffer {
        PixelBuffer::filled(2, 2, &[level, level, level]).unwrap()
    }

    #[test]
    fn test_still_image_emits_once_per_trigger() {
        let mut source = StillImageSource::new(gray(10));
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());

        source.trigger();
        assert!(source.is_armed());
        assert_eq!(source.next_frame(), Some(gray(10)));
        assert!(!source.is_armed());
    }

    #[test]
    fn test_stream_yields_only_unseen_frames() {
        let (sender, mut source) = frame_channel();
        assert!(source.next_frame().is_none());

        assert!(sender.push(gray(1)));
        assert!(sender.push(gray(2)));
        assert_eq!(source.next_frame(), Some(gray(2)));
        assert!(source.next_frame().is_none());

        assert!(sender.push(gray(3)));
        assert_eq!(source.next_frame(), Some(gray(3)));
    }

    #[test]
    fn test_stream_stops_when_device_side_drops() {
        let (sender, mut source) = frame_channel();
        drop(sender);
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_stream_keeps_last_frame_after_device_side_drops() {
        let (sender, mut source) = frame_channel();
        assert!(sender.push(gray(7)));
        drop(sender);

        assert_eq!(source.next_frame(), Some(gray(7)));
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_push_rgba_validates_length() {
        let (sender, _source) = frame_channel();
        assert!(sender.push_rgba(2, 1, vec![0; 8]).unwrap());
        assert!(sender.push_rgba(2, 1, vec![0; 6]).is_err());
    }

    #[test]
    fn test_sender_reports_closed_source() {
        let (sender, source) = frame_channel();
        drop(source);
        assert!(sender.is_closed());
        assert!(!sender.push(gray(0)));
    }

    #[test]
    fn test_device_selection() {
        let request = CameraRequest::default();
        assert!(select_device(&[], &request).is_none());
        assert!(open_camera(&[], request).is_none());

        let devices = vec![DeviceInfo::new("front"), DeviceInfo::new("back")];
        let request = CameraRequest {
            device_index: 1,
            ..CameraRequest::default()
        };
        assert_eq!(select_device(&devices, &request).map(|d| d.name.as_str()), Some("back"));

        let request = CameraRequest {
            device_index: 5,
            ..CameraRequest::default()
        };
        assert!(open_camera(&devices, request).is_none());
    }

    #[test]
    fn test_missing_camera_is_an_empty_source() {
        let mut source: Option<StreamSource> = open_camera(&[], CameraRequest::default()).map(|c| c.source);
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(CameraRequest::default().frame_interval(), Duration::from_nanos(33_333_333));
        let stalled = CameraRequest {
            frame_rate: 0,
            ..CameraRequest::default()
        };
        assert_eq!(stalled.frame_interval(), Duration::from_secs(1));
    }
}
