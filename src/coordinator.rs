//! Verse-synchronized playback of one chapter recitation.
//!
//! The coordinator is owned by whoever shows the chapter and is mutated from a
//! single task. Every transition is published on a broadcast channel; UI code
//! subscribes instead of polling. Any previously loaded media is released
//! before a new fetch starts, on every path that loads.

use std::collections::BTreeSet;

use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, MediaEngine, MediaSource};
use crate::error::{PlaybackError, ValidationError};
use crate::highlight::{self, Highlight, HighlightState};
use crate::models::ChapterAudioFile;
use crate::range::{BoundaryAction, LoopMode, LoopSettings, RangePolicy, VerseRange};
use crate::source::RecitationSource;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    Progress { position_ms: u64, duration_ms: u64 },
    Highlight(Highlight),
    VerseCompleted(String),
    LoopRestarted { to_ms: u64, iteration: Option<u32> },
    ValidationFailed(ValidationError),
    Error(String),
}

/// Point-in-time view for consumers that poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: PlaybackState,
    pub reciter_id: u32,
    pub chapter_id: Option<u32>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub highlight: HighlightState,
    pub range: VerseRange,
    pub looping: LoopSettings,
}

pub struct PlaybackCoordinator<S: RecitationSource, E: MediaEngine> {
    source: S,
    engine: E,
    fetch_timeout: Duration,
    state: PlaybackState,
    reciter_id: u32,
    chapter_id: Option<u32>,
    audio: Option<ChapterAudioFile>,
    media_loaded: bool,
    // a loop restarted on a position report; the engine's matching
    // end-of-media notice must not count as another pass
    restarted: bool,
    position_ms: u64,
    duration_ms: u64,
    highlight: HighlightState,
    policy: RangePolicy,
    events: broadcast::Sender<PlaybackEvent>,
}

impl<S: RecitationSource, E: MediaEngine> PlaybackCoordinator<S, E> {
    pub fn new(source: S, engine: E, reciter_id: u32, fetch_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            engine,
            fetch_timeout,
            state: PlaybackState::Idle,
            reciter_id,
            chapter_id: None,
            audio: None,
            media_loaded: false,
            restarted: false,
            position_ms: 0,
            duration_ms: 0,
            highlight: HighlightState::default(),
            policy: RangePolicy::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn audio(&self) -> Option<&ChapterAudioFile> {
        self.audio.as_ref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            reciter_id: self.reciter_id,
            chapter_id: self.chapter_id,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            highlight: self.highlight.clone(),
            range: self.policy.range(),
            looping: self.policy.loop_settings(),
        }
    }

    pub fn total_verses(&self) -> u32 {
        self.audio.as_ref().map_or(0, |a| a.verse_count())
    }

    /// Load `chapter_id` for the current reciter. Clears the verse window.
    pub async fn load_chapter(&mut self, chapter_id: u32) -> Result<(), PlaybackError> {
        self.chapter_id = Some(chapter_id);
        self.policy.set_range(VerseRange::default());
        self.fetch_active(chapter_id).await
    }

    /// Switch narrator; the active chapter (if any) is fetched again for them.
    pub async fn select_reciter(&mut self, reciter_id: u32) -> Result<(), PlaybackError> {
        info!(from = self.reciter_id, to = reciter_id, "switching reciter");
        self.reciter_id = reciter_id;
        match self.chapter_id {
            Some(chapter) => self.fetch_active(chapter).await,
            None => {
                self.release_media();
                self.clear_loaded();
                self.set_state(PlaybackState::Idle);
                Ok(())
            }
        }
    }

    async fn fetch_active(&mut self, chapter_id: u32) -> Result<(), PlaybackError> {
        self.release_media();
        self.clear_loaded();
        self.policy.reset_iteration();
        self.set_state(PlaybackState::Loading);

        match self.fetch_and_load(chapter_id).await {
            Ok(()) => {
                self.set_state(PlaybackState::Idle);
                self.emit_progress();
                Ok(())
            }
            Err(e) => {
                self.release_media();
                self.clear_loaded();
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch_and_load(&mut self, chapter_id: u32) -> Result<(), PlaybackError> {
        let reciter = self.reciter_id;
        let fetched = timeout(self.fetch_timeout, self.source.chapter_audio(reciter, chapter_id)).await;
        let audio = match fetched {
            Err(_) => {
                return Err(PlaybackError::Fetch(format!(
                    "timed out after {}s loading chapter {chapter_id}",
                    self.fetch_timeout.as_secs_f32()
                )));
            }
            Ok(Err(e)) => return Err(PlaybackError::Fetch(format!("{e:#}"))),
            Ok(Ok(a)) => a,
        };

        // a range kept across a reciter switch must still fit this recitation
        let range = self.policy.range();
        if VerseRange::new(range.start_verse, range.end_verse, audio.verse_count()).is_err() {
            self.policy.set_range(VerseRange::default());
        }

        let media = MediaSource {
            url: audio.audio_url.clone(),
            duration_hint_ms: audio.duration_ms(),
        };
        let duration = self
            .engine
            .load(&media)
            .await
            .map_err(|e| PlaybackError::Media(format!("{e:#}")))?;

        debug!(reciter, chapter_id, verses = audio.verse_count(), duration, "chapter audio ready");
        self.duration_ms = duration.max(audio.duration_ms());
        self.audio = Some(audio);
        self.media_loaded = true;
        Ok(())
    }

    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        match &self.state {
            PlaybackState::Error(msg) => return Err(PlaybackError::Unrecoverable(msg.clone())),
            PlaybackState::Playing | PlaybackState::Loading => return Ok(()),
            PlaybackState::Idle | PlaybackState::Paused => {}
        }
        if !self.media_loaded {
            let Some(chapter) = self.chapter_id else {
                return Err(self.reject(ValidationError::NoChapter).into());
            };
            self.fetch_active(chapter).await?;
        }
        self.align_to_window();
        self.engine.play();
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    // Outside the window, or parked at its end, playback restarts at the window start.
    fn align_to_window(&mut self) {
        let Some(audio) = &self.audio else { return };
        let b = self.policy.boundaries(audio);
        let pos = self.position_ms;
        let restart = if self.policy.is_active() {
            (self.policy.range().is_bounded() && pos < b.start_ms) || pos >= b.end_ms
        } else {
            self.duration_ms > 0 && pos >= self.duration_ms
        };
        if restart {
            self.policy.reset_iteration();
            self.seek_internal(b.start_ms);
        }
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.engine.pause();
        self.position_ms = self.engine.position_ms().min(self.duration_ms);
        self.set_state(PlaybackState::Paused);
        self.emit_progress();
    }

    pub async fn toggle(&mut self) -> Result<(), PlaybackError> {
        if self.state == PlaybackState::Playing {
            self.pause();
            Ok(())
        } else {
            self.play().await
        }
    }

    /// Jump within the loaded audio; the playback state is unchanged.
    pub fn seek_to(&mut self, position_ms: u64) {
        self.seek_internal(position_ms);
    }

    pub fn seek_to_verse(&mut self, verse: u32) -> Result<(), ValidationError> {
        let total = self.total_verses();
        let target = VerseRange::new(Some(verse), Some(verse), total).map_err(|e| self.reject(e))?;
        if let Some(audio) = &self.audio {
            let to_ms = crate::range::boundaries(audio, &target).start_ms;
            self.seek_internal(to_ms);
        }
        Ok(())
    }

    fn seek_internal(&mut self, position_ms: u64) {
        self.restarted = false;
        let clamped = position_ms.min(self.duration_ms);
        if self.media_loaded {
            self.engine.seek(clamped);
        }
        self.position_ms = clamped;
        if clamped == 0 {
            self.highlight.completed_verse_keys.clear();
        } else if let Some(audio) = &self.audio {
            self.highlight.completed_verse_keys = highlight::completed_before(&audio.verse_timings, clamped);
        }
        self.refresh_highlight(clamped);
        self.emit_progress();
    }

    pub fn set_verse_range(&mut self, start: Option<u32>, end: Option<u32>) -> Result<(), ValidationError> {
        let range = VerseRange::new(start, end, self.total_verses()).map_err(|e| self.reject(e))?;
        debug!(?range, "verse range set");
        self.policy.set_range(range);
        Ok(())
    }

    pub fn clear_verse_range(&mut self) {
        self.policy.set_range(VerseRange::default());
    }

    pub fn set_loop_settings(&mut self, loop_count: Option<i64>, infinite: bool) -> Result<(), ValidationError> {
        let mode = LoopMode::from_settings(loop_count, infinite).map_err(|e| self.reject(e))?;
        self.set_loop_mode(mode);
        Ok(())
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        debug!(?mode, "loop mode set");
        self.policy.set_loop_mode(mode);
    }

    pub fn clear_loop_settings(&mut self) {
        self.policy.set_loop_mode(LoopMode::None);
    }

    /// Leave the chapter: stop, release the media and forget everything but the reciter.
    pub fn reset(&mut self) {
        self.release_media();
        self.chapter_id = None;
        self.clear_loaded();
        self.policy.clear();
        self.set_state(PlaybackState::Idle);
    }

    /// Back to the top of the loaded chapter with no window, loop or highlight.
    pub fn reset_playback_settings(&mut self) {
        if self.state == PlaybackState::Playing {
            self.engine.pause();
        }
        self.policy.clear();
        self.highlight.clear();
        if self.media_loaded {
            self.engine.seek(0);
        }
        self.position_ms = 0;
        if !matches!(self.state, PlaybackState::Error(_)) {
            self.set_state(PlaybackState::Idle);
        }
        self.emit(PlaybackEvent::Highlight(Highlight::default()));
        self.emit_progress();
    }

    /// Drain the engine; the session calls this on its polling cadence.
    pub fn tick(&mut self) {
        if !self.media_loaded {
            return;
        }
        for ev in self.engine.poll() {
            self.handle_engine_event(ev);
        }
    }

    pub fn handle_engine_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::Position(ms) => self.on_position(ms),
            EngineEvent::Finished => self.on_finished(),
            EngineEvent::Failed(msg) => {
                warn!(%msg, "media engine failed");
                self.release_media();
                self.fail(format!("playback failed: {msg}"));
            }
        }
    }

    fn on_position(&mut self, ms: u64) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let Some(audio) = &self.audio else { return };
        let position = ms.min(self.duration_ms);
        let end_ms = self.policy.boundaries(audio).end_ms;

        match self.policy.on_tick(audio, position) {
            BoundaryAction::Continue => {
                self.restarted = false;
                self.position_ms = position;
                self.advance_highlight(position, position);
                self.emit_progress();
            }
            BoundaryAction::Pause => {
                info!(position, "end of verse window reached");
                self.engine.pause();
                self.position_ms = position;
                self.advance_highlight(end_ms.saturating_sub(1), end_ms);
                self.set_state(PlaybackState::Paused);
                self.emit_progress();
            }
            BoundaryAction::Restart { to_ms, iteration } => {
                self.restart_window(to_ms, iteration);
                self.restarted = true;
            }
        }
    }

    fn on_finished(&mut self) {
        if self.state != PlaybackState::Playing || std::mem::take(&mut self.restarted) {
            return;
        }
        let Some(audio) = &self.audio else { return };
        let end = self.duration_ms;
        if let BoundaryAction::Restart { to_ms, iteration } = self.policy.on_tick(audio, end) {
            self.restart_window(to_ms, iteration);
            return;
        }

        info!(chapter = ?self.chapter_id, "recitation finished");
        self.position_ms = end;
        let all: BTreeSet<String> = audio.verse_timings.iter().map(|t| t.verse_key.clone()).collect();
        for key in all.difference(&self.highlight.completed_verse_keys).cloned().collect::<Vec<_>>() {
            self.emit(PlaybackEvent::VerseCompleted(key));
        }
        self.highlight.completed_verse_keys = all;
        if self.highlight.verse_key.take().is_some() {
            self.highlight.word_position = None;
            self.emit(PlaybackEvent::Highlight(Highlight::default()));
        }
        self.set_state(PlaybackState::Paused);
        self.emit_progress();
    }

    fn restart_window(&mut self, to_ms: u64, iteration: Option<u32>) {
        debug!(to_ms, ?iteration, "looping verse window");
        self.seek_internal(to_ms);
        // engines stop themselves at the end of the media
        self.engine.play();
        self.emit(PlaybackEvent::LoopRestarted { to_ms, iteration });
    }

    // Project the highlight at `project_at` and mark verses ending by `completed_at`.
    fn advance_highlight(&mut self, project_at: u64, completed_at: u64) {
        let Some(audio) = &self.audio else { return };
        let newly: Vec<String> = audio
            .verse_timings
            .iter()
            .filter(|t| t.timestamp_to <= completed_at)
            .filter(|t| !self.highlight.completed_verse_keys.contains(&t.verse_key))
            .map(|t| t.verse_key.clone())
            .collect();
        for key in newly {
            self.highlight.completed_verse_keys.insert(key.clone());
            self.emit(PlaybackEvent::VerseCompleted(key));
        }
        self.refresh_highlight(project_at);
    }

    fn refresh_highlight(&mut self, at_ms: u64) {
        let projected = self
            .audio
            .as_ref()
            .map(|a| highlight::project(&a.verse_timings, at_ms))
            .unwrap_or_default();
        if projected != self.highlight.current() {
            self.highlight.verse_key = projected.verse_key.clone();
            self.highlight.word_position = projected.word_position;
            self.emit(PlaybackEvent::Highlight(projected));
        }
    }

    fn release_media(&mut self) {
        if self.media_loaded {
            debug!(chapter = ?self.chapter_id, "releasing media");
        }
        self.engine.release();
        self.media_loaded = false;
    }

    fn clear_loaded(&mut self) {
        self.audio = None;
        self.restarted = false;
        self.position_ms = 0;
        self.duration_ms = 0;
        self.highlight.clear();
    }

    fn reject(&self, e: ValidationError) -> ValidationError {
        debug!(error = %e, "rejected playback setting");
        self.emit(PlaybackEvent::ValidationFailed(e.clone()));
        e
    }

    fn fail(&mut self, msg: String) {
        warn!(%msg, "playback error");
        self.emit(PlaybackEvent::Error(msg.clone()));
        self.set_state(PlaybackState::Error(msg));
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state || state == PlaybackState::Idle {
            self.state = state.clone();
            self.emit(PlaybackEvent::StateChanged(state));
        }
    }

    fn emit_progress(&self) {
        self.emit(PlaybackEvent::Progress {
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
        });
    }

    fn emit(&self, ev: PlaybackEvent) {
        // no subscribers is fine
        let _ = self.events.send(ev);
    }
}

impl<S: RecitationSource, E: MediaEngine> Drop for PlaybackCoordinator<S, E> {
    fn drop(&mut self) {
        self.engine.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VerseTiming, WordTiming};
    use crate::range::START_BUFFER_MS;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn chapter(chapter_id: u32, verses: u32) -> ChapterAudioFile {
        let verse_timings = (1..=verses)
            .map(|v| {
                let from = u64::from(v - 1) * 1000;
                VerseTiming {
                    verse_key: format!("{chapter_id}:{v}"),
                    timestamp_from: from,
                    timestamp_to: from + 1000,
                    duration: None,
                    segments: vec![
                        WordTiming { position: 1, start_ms: from, end_ms: from + 500 },
                        WordTiming { position: 2, start_ms: from + 500, end_ms: from + 1000 },
                    ],
                }
            })
            .collect();
        ChapterAudioFile {
            id: 1,
            chapter_id,
            audio_url: format!("https://cdn.test/{chapter_id}.mp3"),
            verse_timings,
        }
    }

    struct FakeSource {
        log: Log,
        verses: u32,
        fail: bool,
        hang: bool,
    }

    impl RecitationSource for FakeSource {
        async fn chapter_audio(&self, reciter_id: u32, chapter_id: u32) -> anyhow::Result<ChapterAudioFile> {
            self.log.lock().unwrap().push(format!("fetch {reciter_id}/{chapter_id}"));
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                anyhow::bail!("HTTP 500");
            }
            Ok(chapter(chapter_id, self.verses))
        }
    }

    struct FakeEngine {
        log: Log,
        position: u64,
        queued: Vec<EngineEvent>,
        broken: bool,
    }

    impl MediaEngine for FakeEngine {
        async fn load(&mut self, media: &MediaSource) -> anyhow::Result<u64> {
            self.log.lock().unwrap().push(format!("load {}", media.url));
            if self.broken {
                anyhow::bail!("cannot decode");
            }
            Ok(media.duration_hint_ms)
        }
        fn play(&mut self) {
            self.log.lock().unwrap().push("play".into());
        }
        fn pause(&mut self) {
            self.log.lock().unwrap().push("pause".into());
        }
        fn seek(&mut self, position_ms: u64) {
            self.position = position_ms;
            self.log.lock().unwrap().push(format!("seek {position_ms}"));
        }
        fn position_ms(&self) -> u64 {
            self.position
        }
        fn poll(&mut self) -> Vec<EngineEvent> {
            std::mem::take(&mut self.queued)
        }
        fn release(&mut self) {
            self.log.lock().unwrap().push("release".into());
        }
    }

    struct Harness {
        log: Log,
        coord: PlaybackCoordinator<FakeSource, FakeEngine>,
    }

    impl Harness {
        fn new(verses: u32) -> Self {
            let log: Log = Arc::default();
            let source = FakeSource { log: log.clone(), verses, fail: false, hang: false };
            let engine = FakeEngine { log: log.clone(), position: 0, queued: Vec::new(), broken: false };
            let coord = PlaybackCoordinator::new(source, engine, 7, Duration::from_secs(15));
            Self { log, coord }
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn clear_log(&self) {
            self.log.lock().unwrap().clear();
        }

        fn tick_at(&mut self, ms: u64) {
            self.coord.handle_engine_event(EngineEvent::Position(ms));
        }
    }

    fn drain(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn load_chapter_goes_idle_loading_idle() {
        let mut h = Harness::new(7);
        let mut rx = h.coord.subscribe();
        h.coord.load_chapter(1).await.unwrap();

        let states: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PlaybackEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(states, [PlaybackState::Loading, PlaybackState::Idle]);
        assert_eq!(h.coord.total_verses(), 7);
        assert_eq!(h.coord.snapshot().duration_ms, 7000);
        assert_eq!(h.entries(), ["release", "fetch 7/1", "load https://cdn.test/1.mp3"]);
    }

    #[tokio::test]
    async fn fetch_failure_is_an_error_state_without_retry() {
        let mut h = Harness::new(7);
        h.coord.source.fail = true;
        let err = h.coord.load_chapter(1).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Fetch(_)));
        assert!(matches!(h.coord.state(), PlaybackState::Error(m) if m.contains("HTTP 500")));
        assert_eq!(h.entries().iter().filter(|e| e.starts_with("fetch")).count(), 1);

        assert!(matches!(h.coord.play().await, Err(PlaybackError::Unrecoverable(_))));

        h.coord.source.fail = false;
        h.coord.select_reciter(3).await.unwrap();
        assert_eq!(h.coord.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn media_failure_is_an_error_state() {
        let mut h = Harness::new(3);
        h.coord.engine.broken = true;
        let err = h.coord.load_chapter(2).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Media(_)));
        assert!(matches!(h.coord.state(), PlaybackState::Error(_)));
        assert!(h.coord.audio().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out_into_error() {
        let mut h = Harness::new(3);
        h.coord.source.hang = true;
        let err = h.coord.load_chapter(1).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(matches!(h.coord.state(), PlaybackState::Error(_)));
    }

    #[tokio::test]
    async fn play_pause_and_seek() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.play().await.unwrap();
        assert_eq!(h.coord.state(), &PlaybackState::Playing);

        h.tick_at(1500);
        assert_eq!(h.coord.snapshot().highlight.verse_key.as_deref(), Some("1:2"));
        assert_eq!(h.coord.snapshot().highlight.word_position, Some(2));

        h.coord.engine.position = 1600;
        h.coord.pause();
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
        assert_eq!(h.coord.snapshot().position_ms, 1600);

        h.coord.seek_to(99_999);
        assert_eq!(h.coord.snapshot().position_ms, 7000);
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
    }

    #[tokio::test]
    async fn play_from_idle_loads_first() {
        let mut h = Harness::new(3);
        h.coord.load_chapter(5).await.unwrap();
        h.coord.select_reciter(9).await.unwrap();
        h.coord.release_media();
        h.clear_log();

        h.coord.play().await.unwrap();
        assert_eq!(h.entries(), ["release", "fetch 9/5", "load https://cdn.test/5.mp3", "play"]);
    }

    #[tokio::test]
    async fn play_without_chapter_is_rejected() {
        let mut h = Harness::new(3);
        let err = h.coord.play().await.unwrap_err();
        assert!(matches!(err, PlaybackError::Validation(ValidationError::NoChapter)));
    }

    #[tokio::test]
    async fn invalid_range_keeps_previous_one() {
        let mut h = Harness::new(7);
        let mut rx = h.coord.subscribe();
        assert_eq!(h.coord.set_verse_range(Some(1), Some(2)), Err(ValidationError::NoChapter));

        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_verse_range(Some(2), Some(4)).unwrap();
        drain(&mut rx);

        let err = h.coord.set_verse_range(Some(5), Some(3)).unwrap_err();
        assert_eq!(err, ValidationError::InvertedRange { start: 5, end: 3 });
        assert_eq!(h.coord.snapshot().range, VerseRange { start_verse: Some(2), end_verse: Some(4) });
        assert_eq!(drain(&mut rx), [PlaybackEvent::ValidationFailed(err)]);

        assert!(h.coord.set_loop_settings(Some(101), false).is_err());
        assert!(h.coord.set_loop_settings(Some(0), false).is_err());
        assert_eq!(h.coord.snapshot().looping.mode, LoopMode::None);
    }

    #[tokio::test]
    async fn finite_loop_counts_then_pauses() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_verse_range(Some(3), Some(5)).unwrap();
        h.coord.set_loop_settings(Some(3), false).unwrap();
        h.coord.play().await.unwrap();

        let start = 2000 + START_BUFFER_MS;
        assert_eq!(h.coord.snapshot().position_ms, start, "play seeks into the window");

        let mut iterations = vec![h.coord.snapshot().looping.current_iteration];
        for _ in 0..3 {
            h.tick_at(4000);
            h.tick_at(5000);
            iterations.push(h.coord.snapshot().looping.current_iteration);
        }
        assert_eq!(iterations, [0, 1, 2, 3]);
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
        assert!(h.coord.snapshot().highlight.completed_verse_keys.contains("1:5"));
        assert_eq!(h.entries().iter().filter(|e| *e == &format!("seek {start}")).count(), 3);
    }

    #[tokio::test]
    async fn infinite_loop_keeps_going_until_cleared() {
        let mut h = Harness::new(7);
        let mut rx = h.coord.subscribe();
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_verse_range(Some(3), Some(5)).unwrap();
        h.coord.set_loop_settings(None, true).unwrap();
        h.coord.play().await.unwrap();
        drain(&mut rx);

        for _ in 0..5 {
            h.tick_at(5000);
            assert_eq!(h.coord.state(), &PlaybackState::Playing);
        }
        let restarts = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PlaybackEvent::LoopRestarted { iteration: None, .. }))
            .count();
        assert_eq!(restarts, 5);
        assert_eq!(h.coord.snapshot().looping.current_iteration, 0);

        h.coord.clear_loop_settings();
        h.tick_at(5000);
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
    }

    #[tokio::test]
    async fn unbounded_playback_finishes_and_clears_highlight() {
        let mut h = Harness::new(2);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.play().await.unwrap();
        h.tick_at(1999);
        h.tick_at(2000);
        assert_eq!(h.coord.snapshot().highlight.verse_key.as_deref(), Some("1:2"), "last verse holds");
        assert_eq!(h.coord.state(), &PlaybackState::Playing);

        h.coord.handle_engine_event(EngineEvent::Finished);
        let snap = h.coord.snapshot();
        assert_eq!(snap.state, PlaybackState::Paused);
        assert_eq!(snap.highlight.verse_key, None);
        assert_eq!(snap.highlight.completed_verse_keys.len(), 2);

        // playing again starts over
        h.coord.play().await.unwrap();
        assert_eq!(h.coord.snapshot().position_ms, 0);
        assert!(h.coord.snapshot().highlight.completed_verse_keys.is_empty());
    }

    #[tokio::test]
    async fn finish_inside_a_loop_restarts_the_window() {
        let mut h = Harness::new(3);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_loop_settings(Some(2), false).unwrap();
        h.coord.play().await.unwrap();
        h.clear_log();

        h.coord.handle_engine_event(EngineEvent::Finished);
        assert_eq!(h.coord.state(), &PlaybackState::Playing);
        assert_eq!(h.entries(), ["seek 0", "play"]);
    }

    #[tokio::test]
    async fn end_of_media_counts_one_pass() {
        let mut h = Harness::new(3);
        let mut rx = h.coord.subscribe();
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_loop_settings(Some(2), false).unwrap();
        h.coord.play().await.unwrap();
        drain(&mut rx);
        h.clear_log();

        // engines report the last position and the end of media together
        h.coord.engine.queued = vec![EngineEvent::Position(3000), EngineEvent::Finished];
        h.coord.tick();
        assert_eq!(h.coord.state(), &PlaybackState::Playing);
        assert_eq!(h.coord.snapshot().looping.current_iteration, 1);
        assert_eq!(h.coord.snapshot().position_ms, 0);
        assert_eq!(h.entries(), ["seek 0", "play"]);

        h.tick_at(1500);
        h.coord.engine.queued = vec![EngineEvent::Position(3000), EngineEvent::Finished];
        h.coord.tick();
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
        assert_eq!(h.coord.snapshot().looping.current_iteration, 2);

        let restarts: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PlaybackEvent::LoopRestarted { iteration, .. } => Some(iteration),
                _ => None,
            })
            .collect();
        assert_eq!(restarts, [Some(1)]);
    }

    #[tokio::test]
    async fn select_reciter_releases_before_fetching() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(2).await.unwrap();
        h.coord.play().await.unwrap();
        h.tick_at(2500);
        h.clear_log();

        h.coord.select_reciter(11).await.unwrap();
        assert_eq!(h.entries(), ["release", "fetch 11/2", "load https://cdn.test/2.mp3"]);
        let snap = h.coord.snapshot();
        assert_eq!(snap.state, PlaybackState::Idle);
        assert_eq!(snap.reciter_id, 11);
        assert_eq!(snap.position_ms, 0);
        assert!(snap.highlight.completed_verse_keys.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_everything_from_any_state() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_verse_range(Some(1), Some(6)).unwrap();
        h.coord.play().await.unwrap();
        h.tick_at(3500);
        assert!(!h.coord.snapshot().highlight.completed_verse_keys.is_empty());

        h.coord.reset();
        let snap = h.coord.snapshot();
        assert_eq!(snap.state, PlaybackState::Idle);
        assert!(snap.highlight.completed_verse_keys.is_empty());
        assert_eq!(snap.range, VerseRange::default());
        assert_eq!(snap.chapter_id, None);
        assert_eq!(h.entries().last().map(String::as_str), Some("release"));

        h.coord.source.fail = true;
        let _ = h.coord.load_chapter(1).await;
        h.coord.reset();
        assert_eq!(h.coord.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn seek_to_zero_clears_completed_verses() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.play().await.unwrap();
        h.tick_at(3500);
        assert_eq!(h.coord.snapshot().highlight.completed_verse_keys.len(), 3);

        h.coord.seek_to(1200);
        assert_eq!(h.coord.snapshot().highlight.completed_verse_keys.len(), 1);
        h.coord.seek_to(0);
        assert!(h.coord.snapshot().highlight.completed_verse_keys.is_empty());
        assert_eq!(h.coord.snapshot().highlight.verse_key.as_deref(), Some("1:1"));
    }

    #[tokio::test]
    async fn seek_to_verse_uses_effective_start() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.seek_to_verse(4).unwrap();
        assert_eq!(h.coord.snapshot().position_ms, 3000 + START_BUFFER_MS);
        assert!(h.coord.seek_to_verse(8).is_err());
    }

    #[tokio::test]
    async fn settings_apply_from_next_tick_only() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.play().await.unwrap();
        h.tick_at(4500);
        h.coord.set_verse_range(Some(1), Some(4)).unwrap();
        assert_eq!(h.coord.state(), &PlaybackState::Playing);
        h.tick_at(4600);
        assert_eq!(h.coord.state(), &PlaybackState::Paused);
    }

    #[tokio::test]
    async fn engine_failure_while_playing() {
        let mut h = Harness::new(3);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.play().await.unwrap();
        h.coord.engine.queued.push(EngineEvent::Failed("device lost".into()));
        h.coord.tick();
        assert!(matches!(h.coord.state(), PlaybackState::Error(m) if m.contains("device lost")));
    }

    #[tokio::test]
    async fn reset_playback_settings_keeps_media() {
        let mut h = Harness::new(7);
        h.coord.load_chapter(1).await.unwrap();
        h.coord.set_verse_range(Some(2), Some(3)).unwrap();
        h.coord.set_loop_settings(None, true).unwrap();
        h.coord.play().await.unwrap();
        h.coord.reset_playback_settings();
        let snap = h.coord.snapshot();
        assert_eq!(snap.state, PlaybackState::Idle);
        assert_eq!(snap.range, VerseRange::default());
        assert_eq!(snap.looping.mode, LoopMode::None);
        assert!(h.coord.audio().is_some());
    }
}
