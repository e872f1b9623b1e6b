// Integration tests for the capture session state machine
//
// Time is paused: timers and encoder ticks advance only as the runtime idles,
// so a 5 second reference takes no wall-clock time.

mod common;

use common::{EncoderScript, ScriptedDevice, ScriptedMedia, ScriptedScorer, ScriptedUploader};
use dance_sync::capture::DeviceLock;
use dance_sync::recording::EncodingHint;
use dance_sync::session::{SessionConfig, StopTrigger, SyncOrchestrator};
use dance_sync::SessionError;
use std::time::Duration;

use dance_sync::session::SessionState::{
    AwaitingScore, DeviceAcquiring, Errored, Finalizing, Idle, Primed, Recording, Scored,
};

fn quarter_second_slices() -> SessionConfig {
    SessionConfig {
        encoding: EncodingHint {
            timeslice: Duration::from_millis(250),
            ..EncodingHint::default()
        },
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_five_second_reference_records_twenty_chunks() {
    let device = ScriptedDevice::new(EncoderScript::default());
    let device_counters = device.counters();
    let media = ScriptedMedia::new(5.0);
    let media_counters = media.counters();

    let (mut session, _handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));

    let asset = session.select_reference(Box::new(media)).await.unwrap();
    assert_eq!(asset.duration_seconds, 5.0);
    assert_eq!(session.state(), Primed);

    session.start().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.history,
        vec![Idle, Primed, DeviceAcquiring, Recording, Finalizing, AwaitingScore]
    );
    assert!(snapshot.timer_armed);
    assert_eq!(snapshot.stop_trigger, Some(StopTrigger::Timer));

    let recorded_ms = snapshot.recorded_ms.unwrap();
    assert!(
        (5000..5100).contains(&recorded_ms),
        "stopped after {}ms",
        recorded_ms
    );

    let artifact = session.artifact().unwrap();
    assert_eq!(artifact.chunk_count, 20);
    assert_eq!(artifact.len(), 20 * 1024);
    assert_eq!(artifact.mime_type, "video/webm;codecs=vp9");

    // Stream released exactly once, reference paused with the recorder
    assert_eq!(device_counters.acquired(), 1);
    assert_eq!(device_counters.released(), 1);
    assert_eq!(device_counters.tracks_stopped(), 1);
    assert_eq!(media_counters.plays(), 1);
    assert!(media_counters.pauses() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_scoring_after_recording() {
    let scorer = ScriptedScorer::returning(Ok(87.5));
    let uploader = ScriptedUploader::accepting();

    let (session, _handle) = SyncOrchestrator::new(
        quarter_second_slices(),
        Box::new(ScriptedDevice::new(EncoderScript::default())),
    );
    let mut session = session
        .with_scorer(scorer.clone())
        .with_uploader(uploader.clone());

    session
        .select_reference(Box::new(ScriptedMedia::new(2.0)))
        .await
        .unwrap();
    session.start().await.unwrap();

    let score = session.score().await.unwrap();
    assert_eq!(score, 87.5);
    assert_eq!(session.state(), Scored);
    assert_eq!(session.snapshot().score, Some(87.5));
    assert_eq!(uploader.uploads(), 2);
    assert_eq!(scorer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_never_arms_timer() {
    let device = ScriptedDevice::denied("Permission denied");
    let counters = device.counters();
    let media = ScriptedMedia::new(5.0);
    let media_counters = media.counters();
    let lock = DeviceLock::new();

    let (session, _handle) = SyncOrchestrator::new(SessionConfig::default(), Box::new(device));
    let mut session = session.with_device_lock(lock.clone());

    session.select_reference(Box::new(media)).await.unwrap();
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, SessionError::DeviceAcquisition(_)));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.history, vec![Idle, Primed, DeviceAcquiring, Errored]);
    assert!(!snapshot.timer_armed);
    assert_eq!(snapshot.error_kind, Some("device_acquisition"));

    // Playback never started, nothing to release, device free again
    assert_eq!(media_counters.plays(), 0);
    assert_eq!(counters.acquire_calls(), 1);
    assert_eq!(counters.released(), 0);
    assert!(lock.holder().is_none());
}

#[tokio::test]
async fn test_unusable_durations_are_rejected() {
    for duration in [f64::NAN, 0.0, -3.0, f64::INFINITY] {
        let device = ScriptedDevice::new(EncoderScript::default());
        let counters = device.counters();
        let (mut session, _handle) = SyncOrchestrator::new(SessionConfig::default(), Box::new(device));

        let err = session
            .select_reference(Box::new(ScriptedMedia::new(duration)))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidDuration(_)), "{}", duration);
        assert_eq!(session.state(), Errored);
        assert!(session.reference().is_none());

        // Errored sessions never resume
        let err = session.start().await.unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(session.state(), Errored);
        assert_eq!(counters.acquire_calls(), 0);
    }
}

#[tokio::test]
async fn test_start_before_reference_is_user_error() {
    let device = ScriptedDevice::new(EncoderScript::default());
    let counters = device.counters();
    let (mut session, _handle) = SyncOrchestrator::new(SessionConfig::default(), Box::new(device));

    let err = session.start().await.unwrap_err();
    assert!(err.is_user_error());
    assert_eq!(session.state(), Idle);
    assert_eq!(session.snapshot().history, vec![Idle]);
    assert_eq!(counters.acquire_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_acquires_once() {
    let device =
        ScriptedDevice::new(EncoderScript::default()).with_acquire_delay(Duration::from_millis(200));
    let counters = device.counters();

    let (session, handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));
    session.spawn();

    handle
        .select_reference(Box::new(ScriptedMedia::new(3.0)))
        .await
        .unwrap();

    handle.start().await.unwrap();
    let err = handle.start().await.unwrap_err();
    assert!(err.is_user_error());

    // Once recording is underway a start is still refused
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), Recording);
    let err = handle.start().await.unwrap_err();
    assert!(err.is_user_error());

    let snapshot = handle.wait_until_settled().await;
    assert_eq!(snapshot.state, AwaitingScore);
    assert_eq!(counters.acquire_calls(), 1);
    assert_eq!(counters.acquired(), 1);
    assert_eq!(counters.released(), 1);

    let artifact = handle.artifact().await.unwrap();
    assert_eq!(artifact.chunk_count, 20);
}

#[tokio::test(start_paused = true)]
async fn test_capture_interrupted_releases_stream() {
    let device = ScriptedDevice::new(EncoderScript {
        fail_after: Some(3),
        ..EncoderScript::default()
    });
    let counters = device.counters();
    let media = ScriptedMedia::new(5.0);
    let media_counters = media.counters();

    let (mut session, _handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));
    session.select_reference(Box::new(media)).await.unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::CaptureInterrupted(_)));
    assert_eq!(
        session.snapshot().history,
        vec![Idle, Primed, DeviceAcquiring, Recording, Errored]
    );
    assert!(session.artifact().is_none());
    assert_eq!(counters.acquired(), 1);
    assert_eq!(counters.released(), 1);
    assert!(media_counters.pauses() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_recording_is_an_error() {
    let device = ScriptedDevice::new(EncoderScript {
        chunks: 0,
        ..EncoderScript::default()
    });
    let counters = device.counters();

    let (mut session, _handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));
    session
        .select_reference(Box::new(ScriptedMedia::new(1.0)))
        .await
        .unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyRecording));
    assert_eq!(
        session.snapshot().history,
        vec![Idle, Primed, DeviceAcquiring, Recording, Finalizing, Errored]
    );
    assert_eq!(counters.acquired(), counters.released());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_encoding_without_platform_default() {
    let device = ScriptedDevice::new(EncoderScript {
        supported: vec!["video/mp4".to_string()],
        default_mime_type: "video/mp4".to_string(),
        ..EncoderScript::default()
    });
    let counters = device.counters();

    let config = SessionConfig {
        encoding: EncodingHint {
            accept_platform_default: false,
            ..EncodingHint::default()
        },
        ..SessionConfig::default()
    };
    let (mut session, _handle) = SyncOrchestrator::new(config, Box::new(device));
    session
        .select_reference(Box::new(ScriptedMedia::new(1.0)))
        .await
        .unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::UnsupportedEncoding(_)));
    assert_eq!(session.snapshot().history, vec![Idle, Primed, DeviceAcquiring, Errored]);
    assert_eq!(counters.acquired(), 1);
    assert_eq!(counters.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_platform_default_encoding_is_accepted() {
    let device = ScriptedDevice::new(EncoderScript {
        supported: vec!["video/mp4".to_string()],
        default_mime_type: "video/mp4".to_string(),
        ..EncoderScript::default()
    });

    let (mut session, _handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));
    session
        .select_reference(Box::new(ScriptedMedia::new(1.0)))
        .await
        .unwrap();
    session.start().await.unwrap();

    assert_eq!(session.artifact().unwrap().mime_type, "video/mp4");
}

#[tokio::test(start_paused = true)]
async fn test_natural_end_stops_recording_early() {
    let media = ScriptedMedia::new(5.0).ending_after(Duration::from_secs(3));
    let (mut session, _handle) = SyncOrchestrator::new(
        quarter_second_slices(),
        Box::new(ScriptedDevice::new(EncoderScript::default())),
    );

    session.select_reference(Box::new(media)).await.unwrap();
    session.start().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.stop_trigger, Some(StopTrigger::MediaEnded));
    let recorded_ms = snapshot.recorded_ms.unwrap();
    assert!((3000..3100).contains(&recorded_ms), "stopped after {}ms", recorded_ms);
    assert_eq!(snapshot.state, AwaitingScore);
}

#[tokio::test(start_paused = true)]
async fn test_natural_end_ignored_when_disabled() {
    let config = SessionConfig {
        stop_on_media_end: false,
        ..quarter_second_slices()
    };
    let media = ScriptedMedia::new(5.0).ending_after(Duration::from_secs(3));
    let (mut session, _handle) = SyncOrchestrator::new(
        config,
        Box::new(ScriptedDevice::new(EncoderScript::default())),
    );

    session.select_reference(Box::new(media)).await.unwrap();
    session.start().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.stop_trigger, Some(StopTrigger::Timer));
    assert!(snapshot.recorded_ms.unwrap() >= 5000);
}

#[tokio::test(start_paused = true)]
async fn test_scoring_failure_keeps_recording() {
    for result in [
        Err(SessionError::Scoring("backend unreachable".to_string())),
        Ok(140.0),
        Ok(f64::NAN),
    ] {
        let scorer = ScriptedScorer::returning(result);
        let (session, _handle) = SyncOrchestrator::new(
            quarter_second_slices(),
            Box::new(ScriptedDevice::new(EncoderScript::default())),
        );
        let mut session = session.with_scorer(scorer.clone());

        session
            .select_reference(Box::new(ScriptedMedia::new(1.0)))
            .await
            .unwrap();
        session.start().await.unwrap();

        let err = session.score().await.unwrap_err();
        assert!(matches!(err, SessionError::Scoring(_)));
        assert_eq!(session.state(), Errored);
        assert_eq!(session.snapshot().error_kind, Some("scoring"));
        assert!(session.snapshot().score.is_none());

        // The recording survives for a retry elsewhere
        let artifact = session.artifact().unwrap();
        assert_eq!(artifact.chunk_count, 20);
        assert_eq!(scorer.calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_skips_scoring() {
    let scorer = ScriptedScorer::returning(Ok(50.0));
    let uploader = ScriptedUploader::failing("413 Payload Too Large");

    let (session, _handle) = SyncOrchestrator::new(
        quarter_second_slices(),
        Box::new(ScriptedDevice::new(EncoderScript::default())),
    );
    let mut session = session
        .with_scorer(scorer.clone())
        .with_uploader(uploader.clone());

    session
        .select_reference(Box::new(ScriptedMedia::new(1.0)))
        .await
        .unwrap();
    session.start().await.unwrap();

    let err = session.score().await.unwrap_err();
    assert!(matches!(err, SessionError::Upload(_)));
    assert_eq!(session.state(), Errored);
    assert_eq!(scorer.calls(), 0);
    assert!(session.artifact().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_actor_scores_automatically() {
    let scorer = ScriptedScorer::returning(Ok(72.0));
    let (session, handle) = SyncOrchestrator::new(
        quarter_second_slices(),
        Box::new(ScriptedDevice::new(EncoderScript::default())),
    );
    session.with_scorer(scorer.clone()).spawn();

    handle
        .select_reference(Box::new(ScriptedMedia::new(2.0)))
        .await
        .unwrap();
    handle.start().await.unwrap();

    let snapshot = handle.wait_until_settled().await;
    assert_eq!(snapshot.state, Scored);
    assert_eq!(snapshot.score, Some(72.0));
    assert_eq!(
        snapshot.history,
        vec![Idle, Primed, DeviceAcquiring, Recording, Finalizing, AwaitingScore, Scored]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shared_device_lock_serializes_sessions() {
    let lock = DeviceLock::new();

    let first_device = ScriptedDevice::new(EncoderScript::default());
    let first_counters = first_device.counters();
    let (first, first_handle) =
        SyncOrchestrator::new(quarter_second_slices(), Box::new(first_device));
    first.with_device_lock(lock.clone()).spawn();

    let second_device = ScriptedDevice::new(EncoderScript::default());
    let second_counters = second_device.counters();
    let (second, second_handle) =
        SyncOrchestrator::new(quarter_second_slices(), Box::new(second_device));
    second.with_device_lock(lock.clone()).spawn();

    for handle in [&first_handle, &second_handle] {
        handle
            .select_reference(Box::new(ScriptedMedia::new(2.0)))
            .await
            .unwrap();
    }

    first_handle.start().await.unwrap();
    assert_eq!(lock.holder(), Some(first_handle.id()));

    let err = second_handle.start().await.unwrap_err();
    assert!(err.is_user_error());
    assert_eq!(second_handle.state(), Primed);
    assert_eq!(second_counters.acquire_calls(), 0);

    first_handle.wait_until_settled().await;
    assert!(lock.holder().is_none());
    assert_eq!(first_counters.released(), 1);

    second_handle.start().await.unwrap();
    let snapshot = second_handle.wait_until_settled().await;
    assert_eq!(snapshot.state, AwaitingScore);
    assert_eq!(second_counters.released(), 1);
    assert!(lock.holder().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_aborted_session_releases_stream() {
    let device = ScriptedDevice::new(EncoderScript::default());
    let counters = device.counters();
    let lock = DeviceLock::new();

    let (session, handle) = SyncOrchestrator::new(quarter_second_slices(), Box::new(device));
    let task = session.with_device_lock(lock.clone()).spawn();

    handle
        .select_reference(Box::new(ScriptedMedia::new(5.0)))
        .await
        .unwrap();
    handle.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), Recording);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(counters.acquired(), 1);
    assert_eq!(counters.released(), 1);
    assert!(lock.holder().is_none());
}
