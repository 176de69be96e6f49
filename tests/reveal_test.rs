use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use typist::reveal::{reveal_stream, RevealFrame, RevealPhase, RevealUnit, Revealer};

const CADENCE: Duration = Duration::from_millis(50);

// Records every prefix published until the current reveal completes.
async fn collect_until_complete(frames: &mut watch::Receiver<RevealFrame>) -> Vec<String> {
    let mut seen = vec![frames.borrow_and_update().prefix.clone()];
    while !frames.borrow().is_complete() {
        frames.changed().await.unwrap();
        seen.push(frames.borrow_and_update().prefix.clone());
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_hi_reveals_three_prefixes_then_stops() {
    let mut revealer = Revealer::new();
    let mut frames = revealer.subscribe();
    revealer.start("hi", CADENCE);

    let seen = collect_until_complete(&mut frames).await;
    assert_eq!(seen, vec!["", "h", "hi"]);

    // No further ticks once complete.
    assert!(timeout(Duration::from_secs(5), frames.changed()).await.is_err());
    assert!(!revealer.is_timer_live());
}

#[tokio::test(start_paused = true)]
async fn test_text_change_mid_reveal_restarts_from_empty() {
    let mut revealer = Revealer::new();
    let mut frames = revealer.subscribe();
    revealer.start("hello", CADENCE);

    let mut seen = vec![frames.borrow_and_update().prefix.clone()];
    while seen.last().map(String::as_str) != Some("he") {
        frames.changed().await.unwrap();
        seen.push(frames.borrow_and_update().prefix.clone());
    }

    revealer.start("world", CADENCE);
    seen.extend(collect_until_complete(&mut frames).await);

    assert_eq!(
        seen,
        vec!["", "h", "he", "", "w", "wo", "wor", "worl", "world"]
    );
    assert_eq!(revealer.current().generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_with_same_text_does_not_double_speed() {
    let mut revealer = Revealer::new();
    let mut frames = revealer.subscribe();
    revealer.start("hello", CADENCE);
    revealer.start("hello", CADENCE);
    let restarted = Instant::now();

    let first = frames.borrow_and_update().clone();
    assert_eq!(first.emitted, 0);
    assert_eq!(first.generation, 2);

    while !frames.borrow().is_complete() {
        frames.changed().await.unwrap();
        let frame = frames.borrow_and_update().clone();
        assert_eq!(frame.generation, 2, "stale timer published a frame");
        // Exactly one unit per cadence: a second timer would run ahead of the clock.
        assert_eq!(restarted.elapsed(), CADENCE * frame.emitted as u32);
    }
    assert_eq!(revealer.prefix(), "hello");
}

#[tokio::test(start_paused = true)]
async fn test_empty_text_is_immediately_complete() {
    let mut revealer = Revealer::new();
    revealer.start("", CADENCE);

    let frame = revealer.current();
    assert_eq!(frame.phase, RevealPhase::Complete);
    assert_eq!(frame.prefix, "");
    assert_eq!(frame.emitted, 0);
    assert!(!revealer.is_timer_live());
}

#[tokio::test(start_paused = true)]
async fn test_emitted_length_grows_by_one_per_tick() {
    let text = "typing effect";
    let prefixes: Vec<String> = reveal_stream(text, CADENCE).collect().await;

    assert_eq!(prefixes.len(), text.chars().count() + 1);
    for pair in prefixes.windows(2) {
        assert!(pair[1].starts_with(pair[0].as_str()));
        assert_eq!(pair[1].chars().count(), pair[0].chars().count() + 1);
    }
    assert_eq!(prefixes.last().unwrap(), text);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_revealer_releases_timer() {
    let mut revealer = Revealer::new();
    let mut frames = revealer.subscribe();
    revealer.start("a long enough response", CADENCE);
    frames.changed().await.unwrap();

    drop(revealer);
    // The sender lives with the revealer and its task; both are gone now.
    let closed = timeout(Duration::from_secs(5), async {
        while frames.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_grapheme_reveal_keeps_emoji_sequences_whole() {
    // Family emoji: four people joined by zero-width joiners.
    let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}\u{200D}\u{1F466}";
    let text = format!("{}!", family);

    let mut revealer = Revealer::with_unit(RevealUnit::Grapheme);
    let mut frames = revealer.subscribe();
    revealer.start(text.clone(), CADENCE);

    let seen = collect_until_complete(&mut frames).await;
    assert_eq!(seen, vec![String::new(), family.to_string(), text]);
}

#[tokio::test]
async fn test_default_cadence_start() {
    let mut revealer = Revealer::default();
    revealer.start_default("x");
    assert_eq!(revealer.phase(), RevealPhase::Revealing);
    assert!(revealer.is_timer_live());
}
