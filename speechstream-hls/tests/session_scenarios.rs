//! End-to-end behavior of MP3 sessions driven through the registry.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use speechstream_hls::playlist::{count_entries, declared_target_duration, has_endlist};
use speechstream_hls::{
    spawn_janitor, Clock, DurationProbe, FirstSegment, HlsError, HlsSession, HlsSettings,
    JanitorConfig, ManualClock, ProbeError, SegmentFormat, SessionOptions, SessionRegistry,
    SessionState,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Always fails, so durations come from the byte-rate estimate.
struct NoProbe;

#[async_trait]
impl DurationProbe for NoProbe {
    async fn probe(&self, _path: &Path) -> Result<f64, ProbeError> {
        Err(ProbeError::Parse("N/A".to_string()))
    }
}

/// Returns a fixed duration per sequence number, after a per-sequence delay.
struct ScriptedProbe {
    durations: Vec<f64>,
    delays_ms: Vec<u64>,
}

#[async_trait]
impl DurationProbe for ScriptedProbe {
    async fn probe(&self, path: &Path) -> Result<f64, ProbeError> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let sequence: usize = name.trim_start_matches("segment").parse().unwrap_or(1);
        let index = sequence.saturating_sub(1);

        if let Some(ms) = self.delays_ms.get(index) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.durations
            .get(index)
            .copied()
            .ok_or_else(|| ProbeError::Parse(name.to_string()))
    }
}

struct Harness {
    _root: tempfile::TempDir,
    registry: Arc<SessionRegistry>,
    clock: Arc<ManualClock>,
}

fn harness_with_probe(probe: Arc<dyn DurationProbe>) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let settings = HlsSettings {
        storage_dir: root.path().to_path_buf(),
        ..HlsSettings::default()
    };
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = Arc::new(SessionRegistry::new(settings, probe, clock.clone()));
    Harness {
        _root: root,
        registry,
        clock,
    }
}

fn harness() -> Harness {
    harness_with_probe(Arc::new(NoProbe))
}

async fn mp3_session(harness: &Harness, segment_duration: f64) -> Arc<dyn HlsSession> {
    let id = harness
        .registry
        .create(SessionOptions::new(SegmentFormat::Mp3).with_segment_duration(segment_duration))
        .await
        .unwrap();
    harness.registry.get(&id).unwrap()
}

fn extinf_durations(playlist: &str) -> Vec<f64> {
    playlist
        .lines()
        .filter_map(|line| line.strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.trim_end_matches(',').parse().ok())
        .collect()
}

fn listed_segments(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_short_stream_becomes_single_remainder_segment() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    // 10 x 1000 bytes is ~0.625s at 16000 B/s: neither trigger fires
    for _ in 0..10 {
        session.add_chunk(Bytes::from(vec![0u8; 1000])).await;
    }
    assert_eq!(session.segment_count().await, 0);

    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    assert_eq!(count_entries(&playlist), 1);
    assert!(has_endlist(&playlist));
    assert_eq!(listed_segments(&playlist), vec!["segment001.mp3"]);
    assert_eq!(session.segment_count().await, 1);
    assert_eq!(session.state(), SessionState::Completed);
}

#[tokio::test]
async fn test_chunk_cap_forces_segment() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    for i in 1..=60 {
        session.add_chunk(Bytes::from_static(b"x")).await;
        if i == 49 {
            assert_eq!(session.segment_count().await, 0);
        }
        if i == 50 {
            assert_eq!(session.segment_count().await, 1);
        }
    }

    session.finalize().await;
    assert_eq!(session.segment_count().await, 2);

    let first = session.fetch_segment("segment001.mp3").await.unwrap();
    let second = session.fetch_segment("segment002.mp3").await.unwrap();
    assert_eq!(first.len(), 50);
    assert_eq!(second.len(), 10);
}

#[tokio::test]
async fn test_error_mid_stream_keeps_existing_segments() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    session.add_chunk(Bytes::from(vec![1u8; 16_000])).await;
    session.add_chunk(Bytes::from(vec![2u8; 16_000])).await;
    session.add_chunk(Bytes::from(vec![3u8; 500])).await;
    assert_eq!(session.segment_count().await, 2);

    session.set_error("boom".to_string()).await;

    let playlist = session.playlist().await.unwrap();
    assert_eq!(count_entries(&playlist), 2);
    assert!(has_endlist(&playlist));
    assert_eq!(session.state().error(), Some("boom"));
    assert!(matches!(
        session.fetch_segment("segment003.mp3").await,
        Err(HlsError::SegmentNotFound(_))
    ));

    // terminal: later chunks, errors and finalize change nothing
    session.add_chunk(Bytes::from(vec![4u8; 16_000])).await;
    session.set_error("second".to_string()).await;
    session.finalize().await;
    assert_eq!(session.state().error(), Some("boom"));
    assert_eq!(session.playlist().await.unwrap(), playlist);
}

#[tokio::test]
async fn test_finalize_without_chunks_is_empty_session() {
    let harness = harness();
    let session = mp3_session(&harness, 4.0).await;

    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    assert_eq!(count_entries(&playlist), 0);
    assert!(has_endlist(&playlist));
    assert!(session.is_empty_stream().await);
    assert_eq!(
        session.wait_for_first_segment(Duration::from_millis(50)).await,
        FirstSegment::Empty
    );
}

#[tokio::test]
async fn test_sweep_evicts_expired_sessions() {
    let harness = harness();
    let timeout = Duration::from_secs(600);
    let session = mp3_session(&harness, 4.0).await;
    let id = session.id().to_string();
    let dir = session.dir().to_path_buf();
    drop(session);

    let at_limit = harness.clock.now() + TimeDelta::seconds(600);
    assert_eq!(harness.registry.sweep(at_limit, timeout).await, 0);
    assert!(harness.registry.get(&id).is_some());

    let expired = at_limit + TimeDelta::seconds(1);
    assert_eq!(harness.registry.sweep(expired, timeout).await, 1);
    assert!(harness.registry.get(&id).is_none());
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    session.add_chunk(Bytes::from(vec![0u8; 2000])).await;
    tokio::join!(session.finalize(), session.finalize());
    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    assert_eq!(playlist.matches("#EXT-X-ENDLIST").count(), 1);
    assert_eq!(count_entries(&playlist), 1);

    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;
    assert_eq!(session.segment_count().await, 1);
}

#[tokio::test]
async fn test_segments_concatenate_to_input() {
    let harness = harness();
    let session = mp3_session(&harness, 0.5).await;

    let mut input = Vec::new();
    for i in 0..40u8 {
        let chunk = vec![i; 700 + usize::from(i) * 13];
        input.extend_from_slice(&chunk);
        session.add_chunk(Bytes::from(chunk)).await;
    }
    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    let mut output = Vec::new();
    for name in listed_segments(&playlist) {
        output.extend_from_slice(&session.fetch_segment(&name).await.unwrap());
    }
    assert_eq!(output, input);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_playlist_order_follows_sequence_under_uneven_probes() {
    // earlier segments take longer to probe than later ones
    let harness = harness_with_probe(Arc::new(ScriptedProbe {
        durations: vec![1.0; 5],
        delays_ms: vec![200, 150, 100, 50, 0],
    }));
    let session = mp3_session(&harness, 1.0).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    assert_eq!(
        listed_segments(&playlist),
        vec![
            "segment001.mp3",
            "segment002.mp3",
            "segment003.mp3",
            "segment004.mp3",
            "segment005.mp3",
        ]
    );
}

#[tokio::test]
async fn test_target_duration_covers_every_segment() {
    let harness = harness_with_probe(Arc::new(ScriptedProbe {
        durations: vec![1.0, 6.4, 2.0],
        delays_ms: vec![],
    }));
    let session = mp3_session(&harness, 1.0).await;

    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;
    let first = session.playlist().await.unwrap();
    assert_eq!(declared_target_duration(&first), Some(2));

    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;
    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;
    session.finalize().await;

    let playlist = session.playlist().await.unwrap();
    let target = declared_target_duration(&playlist).unwrap();
    assert_eq!(target, 7);
    for duration in extinf_durations(&playlist) {
        assert!(duration.ceil() as u64 <= target);
    }
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let harness = harness();
    let a = mp3_session(&harness, 1.0).await;
    let b = mp3_session(&harness, 1.0).await;
    assert_ne!(a.id(), b.id());
    assert_ne!(a.dir(), b.dir());

    let feed = |session: Arc<dyn HlsSession>, byte: u8| async move {
        for _ in 0..3 {
            session.add_chunk(Bytes::from(vec![byte; 16_000])).await;
        }
        session.finalize().await;
    };
    tokio::join!(feed(Arc::clone(&a), 0xAA), feed(Arc::clone(&b), 0xBB));

    assert_eq!(a.segment_count().await, 3);
    assert_eq!(b.segment_count().await, 3);
    let from_a = a.fetch_segment("segment002.mp3").await.unwrap();
    let from_b = b.fetch_segment("segment002.mp3").await.unwrap();
    assert!(from_a.iter().all(|&byte| byte == 0xAA));
    assert!(from_b.iter().all(|&byte| byte == 0xBB));

    // destroying one leaves the other intact
    a.destroy().await;
    assert!(b.fetch_segment("segment001.mp3").await.is_ok());
}

#[tokio::test]
async fn test_fetch_segment_rejects_traversal() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;
    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;

    for name in ["../playlist.m3u8", "..", "a/b", ".hidden", ""] {
        assert!(matches!(
            session.fetch_segment(name).await,
            Err(HlsError::InvalidSegmentName(_))
        ));
    }
    assert!(matches!(
        session.fetch_segment("segment999.mp3").await,
        Err(HlsError::SegmentNotFound(_))
    ));
}

#[tokio::test]
async fn test_first_segment_wait_is_notified() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    assert_eq!(
        session.wait_for_first_segment(Duration::from_millis(20)).await,
        FirstSegment::TimedOut
    );

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.wait_for_first_segment(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.add_chunk(Bytes::from(vec![0u8; 16_000])).await;

    assert_eq!(waiter.await.unwrap(), FirstSegment::Ready);
}

#[tokio::test]
async fn test_first_segment_wait_reports_failure() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.wait_for_first_segment(Duration::from_secs(5)).await })
    };
    session.set_error("synthesis failed".to_string()).await;

    assert_eq!(
        waiter.await.unwrap(),
        FirstSegment::Failed("synthesis failed".to_string())
    );
}

#[tokio::test]
async fn test_janitor_sweeps_in_background() {
    let harness = harness();
    let session = mp3_session(&harness, 1.0).await;
    let id = session.id().to_string();
    drop(session);

    let cancel = CancellationToken::new();
    let handle = spawn_janitor(
        Arc::clone(&harness.registry),
        JanitorConfig {
            interval: Duration::from_millis(10),
            session_timeout: Duration::from_secs(60),
        },
        cancel.clone(),
    );

    harness.clock.advance(Duration::from_secs(61));
    for _ in 0..200 {
        if harness.registry.get(&id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.registry.get(&id).is_none());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_registry_defaults_segment_duration() {
    let harness = harness();
    let id = harness
        .registry
        .create(SessionOptions::new(SegmentFormat::Mp3))
        .await
        .unwrap();
    let session = harness.registry.get(&id).unwrap();
    assert!((session.segment_duration() - 4.0).abs() < f64::EPSILON);

    let invalid = harness
        .registry
        .create(SessionOptions::new(SegmentFormat::Mp3).with_segment_duration(-1.0))
        .await
        .unwrap();
    let session = harness.registry.get(&invalid).unwrap();
    assert!((session.segment_duration() - 4.0).abs() < f64::EPSILON);

    assert_eq!(harness.registry.len(), 2);
    assert_eq!(harness.registry.clear().await, 2);
    assert!(harness.registry.is_empty());
}
