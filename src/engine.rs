//! Media engine seam. The coordinator only issues load/play/pause/seek and
//! drains the engine's events; decoding and output live behind the trait.

use anyhow::{bail, Result};
use tokio::time::Instant;

/// What to hand to the engine for one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub url: String,
    /// End of the timing table, used when the engine cannot probe a duration.
    pub duration_hint_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Position(u64),
    Finished,
    Failed(String),
}

#[allow(async_fn_in_trait)]
pub trait MediaEngine {
    /// Prepare `media` paused at 0 and return its duration in ms.
    async fn load(&mut self, media: &MediaSource) -> Result<u64>;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position_ms: u64);
    fn position_ms(&self) -> u64;
    /// Drain pending events; called on every coordinator tick.
    fn poll(&mut self) -> Vec<EngineEvent>;
    /// Stop output and drop the loaded media. Must be idempotent.
    fn release(&mut self);
}

/// Headless engine: position advances with the monotonic clock while playing.
#[derive(Debug, Default)]
pub struct ClockEngine {
    duration_ms: Option<u64>,
    anchor_ms: u64,
    started_at: Option<Instant>,
    finished: bool,
}

impl ClockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.duration_ms.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }
}

impl MediaEngine for ClockEngine {
    async fn load(&mut self, media: &MediaSource) -> Result<u64> {
        self.release();
        if media.duration_hint_ms == 0 {
            bail!("no duration known for {}", media.url);
        }
        tracing::debug!(url = %media.url, duration_ms = media.duration_hint_ms, "clock engine loaded");
        self.duration_ms = Some(media.duration_hint_ms);
        Ok(media.duration_hint_ms)
    }

    fn play(&mut self) {
        if self.is_loaded() && self.started_at.is_none() {
            self.finished = false;
            self.started_at = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.anchor_ms = self.position_ms();
        self.started_at = None;
    }

    fn seek(&mut self, position_ms: u64) {
        let Some(duration) = self.duration_ms else { return };
        self.anchor_ms = position_ms.min(duration);
        self.finished = false;
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    fn position_ms(&self) -> u64 {
        let Some(duration) = self.duration_ms else { return 0 };
        let elapsed = self
            .started_at
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        (self.anchor_ms + elapsed).min(duration)
    }

    fn poll(&mut self) -> Vec<EngineEvent> {
        let Some(duration) = self.duration_ms else { return Vec::new() };
        let position = self.position_ms();
        let mut events = vec![EngineEvent::Position(position)];
        if position >= duration && !self.finished {
            self.finished = true;
            self.anchor_ms = duration;
            self.started_at = None;
            events.push(EngineEvent::Finished);
        }
        events
    }

    fn release(&mut self) {
        *self = Self::default();
    }
}
