//! Speech player integration tests
//!
//! Runs the orchestrator against mock synthesizers, graphs and media players

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use lingua_voice::voice::{ElementSettings, MediaElementEngine, StartCue};
use lingua_voice::{
    DeviceProfile, EngineMode, Error, PlaybackCallbacks, PlaybackEngine, PlayerState, SpeechPlayer,
    SpeedStrategy,
};

mod common;

use common::{
    EventLog, MockEngine, MockMediaPlayer, MockSynthesizer, UNDECODABLE, mock_graph_engine,
};

const MP3: &[u8] = b"ID3\x04mock-speech";

fn iphone() -> DeviceProfile {
    DeviceProfile {
        is_mobile: true,
        is_ios: true,
        is_android: false,
    }
}

fn assert_speeds(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < f32::EPSILON, "{actual:?} vs {expected:?}");
    }
}

#[tokio::test]
async fn test_repeat_speak_hits_cache() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    let player = SpeechPlayer::new(
        synth.clone(),
        Arc::new(graph),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    player.speak("Hello", 1.0, &log.callbacks()).await.unwrap();
    player.speak("Hello", 1.0, &log.callbacks()).await.unwrap();

    assert_eq!(synth.calls(), 1);
    assert_eq!(log.events(), ["start", "end", "start", "end"]);
    assert_eq!(record.tracker.created(), 1);
    assert_eq!(player.cache().len(), 1);
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_different_speed_is_a_cache_miss() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let player = SpeechPlayer::new(
        synth.clone(),
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let callbacks = PlaybackCallbacks::new();
    player.speak("Hello", 1.0, &callbacks).await.unwrap();
    player.speak("Hello", 1.5, &callbacks).await.unwrap();
    player.speak("  Hello ", 1.5, &callbacks).await.unwrap();

    assert_eq!(synth.calls(), 2);
    assert_eq!(player.cache().len(), 2);
}

#[tokio::test]
async fn test_second_speak_rejected_while_loading() {
    let synth = Arc::new(MockSynthesizer::returning(MP3).with_delay(Duration::from_millis(50)));
    let player = SpeechPlayer::new(
        synth.clone(),
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let first_log = EventLog::default();
    let second_log = EventLog::default();
    let first_callbacks = first_log.callbacks();
    let second_callbacks = second_log.callbacks();
    let (first, second) = tokio::join!(
        player.speak("First", 1.0, &first_callbacks),
        player.speak("Second", 1.0, &second_callbacks),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::ConcurrentSpeak)));
    assert_eq!(second_log.events(), ["error"]);
    assert_eq!(first_log.events(), ["start", "end"]);
    assert_eq!(synth.calls(), 1);

    // The in-flight flag is cleared once the first call is done
    assert!(player.speak("Third", 1.0, &PlaybackCallbacks::new()).await.is_ok());
}

#[tokio::test]
async fn test_in_flight_cleared_when_speak_is_cancelled() {
    let synth = Arc::new(MockSynthesizer::returning(MP3).with_delay(Duration::from_secs(60)));
    let player = SpeechPlayer::new(
        synth,
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        player.speak("Slow", 1.0, &PlaybackCallbacks::new()),
    )
    .await;

    assert!(cancelled.is_err());
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_primary_failure_falls_back_for_good() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let primary = MockEngine::broken("primary");
    let fallback = MockEngine::working("fallback");
    let player = SpeechPlayer::new(
        synth,
        primary.clone(),
        fallback.clone(),
        DeviceProfile::desktop(),
    );
    assert_eq!(player.mode(), EngineMode::Primary);

    let log = EventLog::default();
    player.speak("Hello", 1.0, &log.callbacks()).await.unwrap();

    // Recovered failures are not reported
    assert_eq!(log.events(), ["start", "end"]);
    assert_eq!(player.mode(), EngineMode::Fallback);
    assert!(primary.is_disposed());

    player.speak("Again", 1.0, &log.callbacks()).await.unwrap();
    assert_eq!(primary.plays(), 1);
    assert_eq!(fallback.plays(), 2);
}

#[tokio::test]
async fn test_both_engines_failing_reports_once() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let player = SpeechPlayer::new(
        synth,
        MockEngine::broken("primary"),
        MockEngine::broken("fallback"),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    let result = player.speak("Hello", 1.0, &log.callbacks()).await;

    assert!(matches!(result, Err(Error::Decode(_))));
    assert_eq!(log.events(), ["error"]);
    assert_eq!(player.state(), PlayerState::Idle);
}

#[tokio::test]
async fn test_speed_is_clamped() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let primary = MockEngine::working("primary");
    let player = SpeechPlayer::new(
        synth.clone(),
        primary.clone(),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );
    assert_eq!(player.speed_strategy(), SpeedStrategy::Provider);

    let callbacks = PlaybackCallbacks::new();
    player.speak("Fast", 10.0, &callbacks).await.unwrap();
    player.speak("Slow", 0.01, &callbacks).await.unwrap();

    assert_speeds(&synth.speeds(), &[4.0, 0.25]);
    assert_speeds(&primary.speeds(), &[1.0, 1.0]);

    // Cached under the clamped speed
    player.speak("Fast", 4.0, &callbacks).await.unwrap();
    assert_eq!(synth.calls(), 2);
}

#[tokio::test]
async fn test_engine_speed_strategy() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    let player = SpeechPlayer::new(
        synth.clone(),
        Arc::new(graph),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    )
    .with_speed_strategy(SpeedStrategy::Engine);

    player
        .speak("Hello", 10.0, &PlaybackCallbacks::new())
        .await
        .unwrap();

    assert_speeds(&synth.speeds(), &[1.0]);
    assert_speeds(&record.rates(), &[4.0]);
}

#[tokio::test]
async fn test_decode_failure_releases_resources() {
    let synth = Arc::new(MockSynthesizer::returning(UNDECODABLE));
    let (graph, record) = mock_graph_engine();
    let media_log = EventLog::default();
    let fallback = Arc::new(MediaElementEngine::new(
        MockMediaPlayer::with_log(media_log.clone()),
        ElementSettings::desktop(),
    ));
    let player = SpeechPlayer::new(
        synth,
        Arc::new(graph),
        fallback.clone(),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    player.speak("Hello", 1.0, &log.callbacks()).await.unwrap();

    assert_eq!(record.tracker.created(), 1);
    assert_eq!(record.tracker.open(), 0);
    assert!(record.rates().is_empty());
    assert_eq!(player.mode(), EngineMode::Fallback);
    assert_eq!(log.events(), ["start", "end"]);
    assert_eq!(media_log.events(), ["load", "play"]);

    let paths = fallback.player().paths();
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].exists());
}

#[tokio::test]
async fn test_synthesis_status_is_reported() {
    let synth = Arc::new(MockSynthesizer::failing(503));
    let primary = MockEngine::working("primary");
    let player = SpeechPlayer::new(
        synth,
        primary.clone(),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    let err = player
        .speak("Hello", 1.0, &log.callbacks())
        .await
        .unwrap_err();

    assert!(err.is_synthesis());
    assert_eq!(err.status(), Some(503));
    assert_eq!(log.events(), ["error"]);
    assert_eq!(primary.plays(), 0);
    assert!(player.cache().is_empty());
    assert_eq!(player.mode(), EngineMode::Primary);
}

#[tokio::test]
async fn test_empty_text_rejected() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let player = SpeechPlayer::new(
        synth.clone(),
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    let result = player.speak("   ", 1.0, &log.callbacks()).await;

    assert!(matches!(result, Err(Error::EmptyText)));
    assert_eq!(log.count("error"), 1);
    assert_eq!(synth.calls(), 0);
}

#[tokio::test]
async fn test_mobile_uses_media_element() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    let log = EventLog::default();
    let settings = ElementSettings::for_profile(&iphone());
    assert_eq!(settings.start_cue, StartCue::CanPlayThrough);

    let fallback = Arc::new(MediaElementEngine::new(
        MockMediaPlayer::with_log(log.clone()),
        settings,
    ));
    let player = SpeechPlayer::new(synth, Arc::new(graph), fallback.clone(), iphone());
    assert_eq!(player.mode(), EngineMode::Fallback);

    player.speak("Bonjour", 1.0, &log.callbacks()).await.unwrap();

    // Start fires once the media is ready, not when loading begins
    assert_eq!(log.events(), ["load", "start", "play", "end"]);
    assert_eq!(record.tracker.created(), 0);
    assert!(fallback.player().paths().iter().all(|p| !p.exists()));
}

#[tokio::test]
async fn test_stop_ends_playback() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    record.hold.store(true, Ordering::SeqCst);
    let graph = Arc::new(graph);
    let player = Arc::new(SpeechPlayer::new(
        synth,
        graph.clone(),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    ));

    // Idle stop is a no-op
    player.stop();

    let log = EventLog::default();
    let speaking = tokio::spawn({
        let player = Arc::clone(&player);
        let callbacks = log.callbacks();
        async move { player.speak("Long story", 1.0, &callbacks).await }
    });

    while record.rates().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(player.is_playing());
    assert!(graph.is_playing());
    player.stop();

    speaking.await.unwrap().unwrap();
    assert_eq!(log.events(), ["start", "end"]);
    assert_eq!(player.state(), PlayerState::Idle);
    assert_eq!(player.mode(), EngineMode::Primary);
}

#[tokio::test]
async fn test_stop_while_decoding_skips_playback() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    record.hold.store(true, Ordering::SeqCst);
    *record.decode_delay.lock() = Duration::from_millis(300);
    let player = Arc::new(SpeechPlayer::new(
        synth,
        Arc::new(graph),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    ));

    let log = EventLog::default();
    let speaking = tokio::spawn({
        let player = Arc::clone(&player);
        let callbacks = log.callbacks();
        async move { player.speak("Long story", 1.0, &callbacks).await }
    });

    while record.decodes.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(player.is_playing());
    player.stop();

    tokio::time::timeout(Duration::from_secs(2), speaking)
        .await
        .expect("stop should end the speak call")
        .unwrap()
        .unwrap();

    assert!(record.rates().is_empty());
    assert_eq!(log.events(), ["end"]);
    assert_eq!(player.state(), PlayerState::Idle);
    assert_eq!(player.mode(), EngineMode::Primary);
    // The fetched audio is still cached
    assert_eq!(player.cache().len(), 1);
}

#[tokio::test]
async fn test_fallback_after_started_primary_fires_start_once() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    record.fail_start.store(true, Ordering::SeqCst);
    let fallback = MockEngine::working("fallback");
    let player = SpeechPlayer::new(
        synth,
        Arc::new(graph),
        fallback.clone(),
        DeviceProfile::desktop(),
    );

    let log = EventLog::default();
    player.speak("Hello", 1.0, &log.callbacks()).await.unwrap();

    assert_eq!(log.events(), ["start", "end"]);
    assert_eq!(fallback.plays(), 1);
    assert_eq!(player.mode(), EngineMode::Fallback);
    assert_eq!(record.tracker.open(), 0);

    // Each speak call gets its own start
    player.speak("Again", 1.0, &log.callbacks()).await.unwrap();
    assert_eq!(log.count("start"), 2);
}

#[tokio::test]
async fn test_dispose_rejects_further_speech() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let (graph, record) = mock_graph_engine();
    let player = SpeechPlayer::new(
        synth,
        Arc::new(graph),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );

    player
        .speak("Hello", 1.0, &PlaybackCallbacks::new())
        .await
        .unwrap();
    assert_eq!(record.tracker.open(), 1);

    player.dispose();
    assert_eq!(record.tracker.open(), 0);

    let log = EventLog::default();
    let result = player.speak("Hello", 1.0, &log.callbacks()).await;
    assert!(matches!(result, Err(Error::Disposed)));
    assert_eq!(log.events(), ["error"]);
}

#[tokio::test]
async fn test_players_share_a_cache() {
    let synth = Arc::new(MockSynthesizer::returning(MP3));
    let first = SpeechPlayer::new(
        synth.clone(),
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    );
    let second = SpeechPlayer::new(
        synth.clone(),
        MockEngine::working("primary"),
        MockEngine::working("fallback"),
        DeviceProfile::desktop(),
    )
    .with_cache(first.cache().clone());

    let callbacks = PlaybackCallbacks::new();
    first.speak("Shared", 1.0, &callbacks).await.unwrap();
    second.speak("Shared", 1.0, &callbacks).await.unwrap();

    assert_eq!(synth.calls(), 1);
}
