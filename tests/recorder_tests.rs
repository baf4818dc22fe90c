// Integration tests for the recording session manager
//
// A silence capture source feeds the recorder; the in-memory recognizer
// answers preloads and injects transcription events.

mod common;

use anyhow::Result;
use common::{eventually, MockRecognizer};
use std::time::Duration;
use tokio::sync::mpsc;
use voicecall::audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSource};
use voicecall::error::CallError;
use voicecall::recording::{Recorder, RecorderEvent};

const WAIT: Duration = Duration::from_secs(2);

fn silence() -> Result<Box<dyn AudioBackend>> {
    let config = AudioBackendConfig {
        target_sample_rate: 16000,
        target_channels: 1,
        buffer_duration_ms: 20,
    };
    AudioBackendFactory::create(&AudioSource::Silence, config)
}

async fn connect(recognizer: &MockRecognizer) -> Result<(Recorder, mpsc::Receiver<RecorderEvent>)> {
    Recorder::connect(recognizer, silence()?, Duration::from_millis(300)).await
}

async fn next_event(events: &mut mpsc::Receiver<RecorderEvent>) -> Option<RecorderEvent> {
    tokio::time::timeout(WAIT, events.recv()).await.ok().flatten()
}

#[tokio::test]
async fn test_preload_precedes_audio() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, _events) = connect(&recognizer).await?;

    let session = recorder.create_session().await?;
    assert!(recorder.is_listening());
    assert_eq!(recorder.session().await, Some(session));

    recorder.start_recording().await?;
    assert!(recorder.is_recording());
    assert!(eventually(WAIT, || recognizer.audio_frames() >= 3).await);

    assert_eq!(recognizer.preloads(), 1);
    assert!(!recognizer.audio_before_preload());
    assert!(!recognizer.sequence_regressed());

    recorder.stop_recording().await;
    assert!(!recorder.is_recording());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frames = recognizer.audio_frames();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recognizer.audio_frames(), frames);

    let stats = recorder.stats();
    assert_eq!(stats.sessions_created, 1);
    assert!(stats.frames_sent >= 3);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_start_without_session_is_a_no_op() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, _events) = connect(&recognizer).await?;

    recorder.start_recording().await?;
    assert!(!recorder.is_recording());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recognizer.audio_frames(), 0);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_sessions_are_strictly_increasing() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, _events) = connect(&recognizer).await?;

    let first = recorder.create_session().await?;
    let second = recorder.create_session().await?;
    assert!(second.id > first.id);
    assert_eq!(recorder.stats().sessions_created, 2);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_preload_timeout() -> Result<()> {
    let recognizer = MockRecognizer::new();
    recognizer.go_silent();
    let (recorder, _events) = connect(&recognizer).await?;

    let err = recorder.create_session().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<CallError>(), Some(CallError::PreloadTimeout(300))));
    assert!(!recorder.is_listening());
    assert_eq!(recorder.session().await, None);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_interim_and_final_transcripts() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, mut events) = connect(&recognizer).await?;
    recorder.create_session().await?;
    recorder.start_recording().await?;

    recognizer.say_interim("hel").await;
    match next_event(&mut events).await {
        Some(RecorderEvent::Interim { text }) => assert_eq!(text, "hel"),
        other => panic!("expected interim, got {:?}", other),
    }

    // Preserving keeps the session and the capture running
    recognizer.say_final("hello").await;
    match next_event(&mut events).await {
        Some(RecorderEvent::Final { text, duration_secs, preserve }) => {
            assert_eq!(text, "hello");
            assert!(duration_secs > 0.0);
            let _ = preserve.send(true);
        }
        other => panic!("expected final, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorder.is_recording());
    assert!(recorder.session().await.is_some());

    // Declining retires it
    recognizer.say_final("goodbye").await;
    match next_event(&mut events).await {
        Some(RecorderEvent::Final { preserve, .. }) => {
            let _ = preserve.send(false);
        }
        other => panic!("expected final, got {:?}", other),
    }
    assert!(eventually(WAIT, || !recorder.is_recording()).await);
    assert_eq!(recorder.session().await, None);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_and_sessionless_transcripts_are_ignored() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, mut events) = connect(&recognizer).await?;

    // No session yet
    recognizer.say_final("too early").await;

    recorder.create_session().await?;
    recognizer.say_final("").await;
    recognizer.say_interim("").await;
    recognizer.say_interim("now").await;

    match next_event(&mut events).await {
        Some(RecorderEvent::Interim { text }) => assert_eq!(text, "now"),
        other => panic!("expected interim, got {:?}", other),
    }

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_transcription_failure_tears_down_session() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, mut events) = connect(&recognizer).await?;
    recorder.create_session().await?;
    recorder.start_recording().await?;

    recognizer.fail_transcription().await;
    assert!(matches!(next_event(&mut events).await, Some(RecorderEvent::TranscriptionFailed)));
    assert!(!recorder.is_recording());
    assert_eq!(recorder.session().await, None);

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_raises_quit_once() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, mut events) = connect(&recognizer).await?;
    recorder.create_session().await?;

    recognizer.drop_connection().await;
    recognizer.drop_connection().await;

    match next_event(&mut events).await {
        Some(RecorderEvent::Quit { reason }) => assert_eq!(reason, "connection reset"),
        other => panic!("expected quit, got {:?}", other),
    }
    assert!(!recorder.is_listening());
    assert!(tokio::time::timeout(Duration::from_millis(200), events.recv()).await.is_err());

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_preload_fails_fast() -> Result<()> {
    let recognizer = MockRecognizer::new();
    recognizer.go_silent();
    let (recorder, mut events) = connect(&recognizer).await?;

    let pending = {
        let recorder = recorder.clone();
        tokio::spawn(async move { recorder.create_session().await })
    };
    assert!(eventually(WAIT, || recognizer.preloads() == 1).await);
    recognizer.drop_connection().await;

    // Well inside the 300ms preload timeout
    let result = tokio::time::timeout(Duration::from_millis(150), pending).await??;
    let err = result.unwrap_err();
    assert!(matches!(err.downcast_ref::<CallError>(), Some(CallError::TransportClosed(_))));
    assert!(!recorder.is_listening());

    assert!(matches!(next_event(&mut events).await, Some(RecorderEvent::Quit { .. })));

    recorder.cleanup().await;
    Ok(())
}

#[tokio::test]
async fn test_cleanup_raises_no_quit() -> Result<()> {
    let recognizer = MockRecognizer::new();
    let (recorder, mut events) = connect(&recognizer).await?;
    recorder.create_session().await?;
    recorder.start_recording().await?;

    recorder.cleanup().await;
    assert!(!recorder.is_recording());
    assert_eq!(recorder.session().await, None);

    // The event stream ends without a Quit
    assert!(next_event(&mut events).await.is_none());

    Ok(())
}
