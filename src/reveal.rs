//! Typing reveal: a text shown as a prefix that grows by one unit per cadence tick.
//!
//! [`reveal_stream`] is the lazy form, a stream of prefixes that owns its own
//! interval. [`Revealer`] is the restartable form used by the chat surfaces: it
//! owns at most one timer task and publishes [`RevealFrame`]s on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

use crate::constants::DEFAULT_CADENCE;

// tokio intervals panic on a zero period.
const MIN_CADENCE: Duration = Duration::from_millis(1);

/// What a single tick reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevealUnit {
    /// One Unicode scalar value.
    #[default]
    Char,
    /// One extended grapheme cluster, so combining marks and emoji sequences appear whole.
    Grapheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPhase {
    Idle,
    Revealing,
    Complete,
}

/// Counts the reveal units in `text`.
pub fn unit_count(text: &str, unit: RevealUnit) -> usize {
    match unit {
        RevealUnit::Char => text.chars().count(),
        RevealUnit::Grapheme => text.graphemes(true).count(),
    }
}

/// Progress of one reveal over one source text.
#[derive(Debug, Clone)]
pub struct RevealState {
    source_text: String,
    // Byte offset where each unit ends; a prefix of n units is source_text[..ends[n - 1]].
    ends: Vec<usize>,
    emitted_length: usize,
    cadence: Duration,
}

impl RevealState {
    pub fn new(source_text: impl Into<String>, cadence: Duration) -> Self {
        Self::with_unit(source_text, cadence, RevealUnit::Char)
    }

    pub fn with_unit(source_text: impl Into<String>, cadence: Duration, unit: RevealUnit) -> Self {
        let source_text = source_text.into();
        let ends = match unit {
            RevealUnit::Char => source_text
                .char_indices()
                .map(|(start, c)| start + c.len_utf8())
                .collect(),
            RevealUnit::Grapheme => source_text
                .grapheme_indices(true)
                .map(|(start, g)| start + g.len())
                .collect(),
        };
        Self {
            source_text,
            ends,
            emitted_length: 0,
            cadence: cadence.max(MIN_CADENCE),
        }
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn emitted_length(&self) -> usize {
        self.emitted_length
    }

    pub fn total_units(&self) -> usize {
        self.ends.len()
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn prefix(&self) -> &str {
        match self.emitted_length {
            0 => "",
            n => &self.source_text[..self.ends[n - 1]],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.emitted_length == self.ends.len()
    }

    pub fn phase(&self) -> RevealPhase {
        if self.is_complete() {
            RevealPhase::Complete
        } else {
            RevealPhase::Revealing
        }
    }

    /// Reveals one more unit. Returns `false` once the whole text is out.
    pub fn advance(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.emitted_length += 1;
        true
    }
}

// The first tick lands one cadence after creation; the empty prefix never waits.
fn cadence_ticker(cadence: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Lazily yields `""` and then one longer prefix of `text` per tick, ending with
/// the full text. Empty text yields a single `""` and never creates a timer.
pub fn reveal_stream(text: impl Into<String>, cadence: Duration) -> impl Stream<Item = String> {
    reveal_stream_with_unit(text, cadence, RevealUnit::Char)
}

pub fn reveal_stream_with_unit(
    text: impl Into<String>,
    cadence: Duration,
    unit: RevealUnit,
) -> impl Stream<Item = String> {
    let state = RevealState::with_unit(text, cadence, unit);
    stream::unfold(
        (state, None::<Interval>, true),
        |(mut state, mut ticker, first)| async move {
            if first {
                let prefix = state.prefix().to_string();
                return Some((prefix, (state, ticker, false)));
            }
            if state.is_complete() {
                return None;
            }
            ticker
                .get_or_insert_with(|| cadence_ticker(state.cadence()))
                .tick()
                .await;
            state.advance();
            let prefix = state.prefix().to_string();
            Some((prefix, (state, ticker, false)))
        },
    )
}

/// Snapshot of a [`Revealer`], published after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealFrame {
    /// Bumped on every start or reset, so observers can tell reveals apart.
    pub generation: u64,
    pub prefix: String,
    pub emitted: usize,
    pub total: usize,
    pub phase: RevealPhase,
}

impl RevealFrame {
    fn idle(generation: u64) -> Self {
        Self {
            generation,
            prefix: String::new(),
            emitted: 0,
            total: 0,
            phase: RevealPhase::Idle,
        }
    }

    fn from_state(generation: u64, state: &RevealState) -> Self {
        Self {
            generation,
            prefix: state.prefix().to_string(),
            emitted: state.emitted_length(),
            total: state.total_units(),
            phase: state.phase(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == RevealPhase::Complete
    }
}

/// Restartable reveal owning at most one live timer task.
///
/// Starting a new reveal aborts the previous task before the next one is
/// spawned. Tasks also check the generation before every publish, so a task that
/// is mid-poll on another worker when it is aborted still cannot write into the
/// new reveal. Dropping the revealer releases the timer.
#[derive(Debug)]
pub struct Revealer {
    frames: Arc<watch::Sender<RevealFrame>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
    unit: RevealUnit,
}

impl Revealer {
    pub fn new() -> Self {
        Self::with_unit(RevealUnit::Char)
    }

    pub fn with_unit(unit: RevealUnit) -> Self {
        let (frames, _) = watch::channel(RevealFrame::idle(0));
        Self {
            frames: Arc::new(frames),
            task: None,
            generation: 0,
            unit,
        }
    }

    pub fn unit(&self) -> RevealUnit {
        self.unit
    }

    /// Starts revealing `text` from an empty prefix, discarding any reveal in flight.
    ///
    /// Must be called from within a tokio runtime unless `text` is empty.
    pub fn start(&mut self, text: impl Into<String>, cadence: Duration) {
        self.release_timer();
        self.generation += 1;
        let generation = self.generation;

        let mut state = RevealState::with_unit(text, cadence, self.unit);
        self.frames
            .send_replace(RevealFrame::from_state(generation, &state));
        if state.is_complete() {
            debug!(generation, "Nothing to reveal, no timer scheduled");
            return;
        }

        info!(
            generation,
            units = state.total_units(),
            cadence_ms = state.cadence().as_millis() as u64,
            "Starting reveal"
        );
        let frames = Arc::clone(&self.frames);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = cadence_ticker(state.cadence());
            loop {
                ticker.tick().await;
                state.advance();
                let frame = RevealFrame::from_state(generation, &state);
                let current = frames.send_if_modified(|slot| {
                    if slot.generation != generation {
                        return false;
                    }
                    *slot = frame;
                    true
                });
                if !current {
                    debug!(generation, "Reveal superseded");
                    break;
                }
                if state.is_complete() {
                    debug!(generation, "Reveal complete, releasing timer");
                    break;
                }
            }
        }));
    }

    /// Starts revealing at [`DEFAULT_CADENCE`].
    pub fn start_default(&mut self, text: impl Into<String>) {
        self.start(text, DEFAULT_CADENCE);
    }

    /// Cancels any reveal and goes back to an idle, empty prefix.
    pub fn reset(&mut self) {
        self.release_timer();
        self.generation += 1;
        self.frames.send_replace(RevealFrame::idle(self.generation));
    }

    pub fn current(&self) -> RevealFrame {
        self.frames.borrow().clone()
    }

    pub fn prefix(&self) -> String {
        self.frames.borrow().prefix.clone()
    }

    pub fn phase(&self) -> RevealPhase {
        self.frames.borrow().phase
    }

    /// Receiver that sees every frame this revealer publishes, across restarts.
    pub fn subscribe(&self) -> watch::Receiver<RevealFrame> {
        self.frames.subscribe()
    }

    pub fn is_timer_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn release_timer(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!(generation = self.generation, "Releasing reveal timer");
            }
            task.abort();
        }
    }
}

impl Default for Revealer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Revealer {
    fn drop(&mut self) {
        self.release_timer();
    }
}
