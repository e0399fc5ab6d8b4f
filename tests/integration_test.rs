use std::time::Duration;

use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use animegan_rs::{
    mocks::MockBackend, open_camera, CameraRequest, DeviceInfo, InferenceSession, PixelBuffer,
    StillImageSource, StyleError, StylePipeline, TickOutcome,
};

fn gray(level: u8) -> PixelBuffer {
    PixelBuffer::filled(4, 3, &[level, level, level, 255]).unwrap()
}

#[test]
fn test_still_image_from_disk() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("source.png");
    RgbImage::from_pixel(6, 4, Rgb([255, 0, 0])).save(&path)?;

    let session = InferenceSession::with_backend(MockBackend::identity())?;
    let mut pipeline = StylePipeline::new(session, StillImageSource::open(&path)?);

    assert!(matches!(pipeline.tick(), TickOutcome::Submitted(_)));
    loop {
        match pipeline.tick() {
            TickOutcome::Waiting(_) => std::thread::yield_now(),
            TickOutcome::Presented(_) => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    let frame = pipeline.latest().expect("presented frame");
    assert_eq!(frame.dimensions(), (6, 4));
    assert_eq!(frame.pixel(5, 3), Some(&[255, 0, 0, 255][..]));
    Ok(())
}

#[test]
fn test_missing_still_image_is_reported() {
    let err = StillImageSource::open(std::path::Path::new("no/such/image.png")).unwrap_err();
    assert!(matches!(err, StyleError::ImageProcessing { .. }));
}

#[tokio::test]
async fn test_camera_stream_run_loop() -> Result<(), Box<dyn std::error::Error>> {
    let devices = vec![DeviceInfo::new("Integrated Camera")];
    let request = CameraRequest {
        frame_rate: 500,
        ..CameraRequest::default()
    };
    let camera = open_camera(&devices, request).expect("device available");
    assert_eq!(camera.device.name, "Integrated Camera");
    let frame_interval = camera.request.frame_interval();
    assert_eq!(frame_interval, Duration::from_millis(2));

    let sender = camera.sender;
    let session = InferenceSession::with_backend(MockBackend::inverting())?;
    let mut pipeline = StylePipeline::new(session, camera.source);

    let feeder = tokio::spawn(async move {
        for level in [0u8, 255, 0, 255] {
            if !sender.push(gray(level)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        sender
    });

    let cancel = CancellationToken::new();
    let mut presented = Vec::new();
    let stats = {
        let cancel = cancel.clone();
        pipeline
            .run(frame_interval, cancel.clone(), |frame| {
                presented.push(frame.pixel(0, 0).map(|p| p[0]));
                if presented.len() >= 2 {
                    cancel.cancel();
                }
            })
            .await
    };
    let _sender = feeder.await?;

    assert!(presented.len() >= 2);
    // inverted gray levels only
    assert!(presented.iter().all(|p| matches!(p, Some(0) | Some(255))));
    assert_eq!(stats.presented as usize, presented.len());
    assert!(stats.skipped > 0);
    assert!(!pipeline.is_waiting());
    Ok(())
}

#[tokio::test]
async fn test_run_loop_tolerates_missing_camera() -> Result<(), Box<dyn std::error::Error>> {
    let source = open_camera(&[], CameraRequest::default()).map(|camera| camera.source);
    let session = InferenceSession::with_backend(MockBackend::identity())?;
    let mut pipeline = StylePipeline::new(session, source);

    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let stats = pipeline
        .run(Duration::from_millis(1), cancel, |_| panic!("nothing to present"))
        .await;
    stopper.await?;

    assert_eq!(stats.submitted, 0);
    assert!(stats.skipped > 0);
    assert!(pipeline.latest().is_none());
    Ok(())
}

#[tokio::test]
async fn test_stylize_is_busy_while_tick_request_in_flight() -> Result<(), Box<dyn std::error::Error>>
{
    let gate = animegan_rs::mocks::Gate::closed();
    let session = InferenceSession::with_backend(MockBackend::identity().with_gate(gate.clone()))?;
    let mut pipeline = StylePipeline::new(session, StillImageSource::new(gray(50)));

    assert!(matches!(pipeline.tick(), TickOutcome::Submitted(_)));
    let err = pipeline.stylize(&gray(60)).await.unwrap_err();
    assert!(matches!(err, StyleError::SessionBusy { .. }));

    gate.open(2);
    let (session, _) = pipeline.into_parts();
    // the discarded tick request has to finish before the session frees up
    while session.is_busy() {
        tokio::task::yield_now().await;
    }
    let styled = animegan_rs::stylize(&session, &gray(60)).await?;
    assert_eq!(styled.pixel(0, 0), Some(&[60, 60, 60, 255][..]));
    Ok(())
}
