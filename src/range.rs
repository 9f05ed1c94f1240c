//! Verse window and repeat policy.
//!
//! Boundaries are derived from the timing table. Upstream `timestamp_to`
//! values end slightly early, so a window starting mid-chapter begins a fixed
//! buffer after the previous verse ends instead of at its own
//! `timestamp_from`.

use crate::error::ValidationError;
use crate::models::ChapterAudioFile;

pub const START_BUFFER_MS: u64 = 250;
pub const MAX_LOOP_COUNT: u32 = 100;

/// `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerseRange {
    pub start_verse: Option<u32>,
    pub end_verse: Option<u32>,
}

impl VerseRange {
    pub fn new(start: Option<u32>, end: Option<u32>, total: u32) -> Result<Self, ValidationError> {
        if total == 0 {
            return Err(ValidationError::NoChapter);
        }
        for verse in [start, end].into_iter().flatten() {
            if !(1..=total).contains(&verse) {
                return Err(ValidationError::VerseOutOfRange { verse, total });
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(ValidationError::InvertedRange { start, end });
            }
        }
        Ok(Self { start_verse: start, end_verse: end })
    }

    /// "3-5", "7" (single verse), "3-" or "-5".
    pub fn parse(input: &str, total: u32) -> Result<Self, ValidationError> {
        let bad = || ValidationError::Unparsable { what: "verse range", input: input.to_string() };
        let side = |s: &str| -> Result<Option<u32>, ValidationError> {
            let s = s.trim();
            if s.is_empty() { Ok(None) } else { s.parse().map(Some).map_err(|_| bad()) }
        };
        let (start, end) = match input.trim().split_once('-') {
            Some((a, b)) => (side(a)?, side(b)?),
            None => {
                let v = side(input)?.ok_or_else(bad)?;
                (Some(v), Some(v))
            }
        };
        Self::new(start, end, total)
    }

    pub fn is_bounded(&self) -> bool {
        self.start_verse.is_some() || self.end_verse.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    None,
    Counted(u32),
    Infinite,
}

impl LoopMode {
    pub fn from_settings(loop_count: Option<i64>, infinite: bool) -> Result<Self, ValidationError> {
        match (loop_count, infinite) {
            (Some(_), true) => Err(ValidationError::ConflictingLoopMode),
            (None, true) => Ok(LoopMode::Infinite),
            (None, false) => Ok(LoopMode::None),
            (Some(n), false) => {
                if (1..=i64::from(MAX_LOOP_COUNT)).contains(&n) {
                    Ok(LoopMode::Counted(n as u32))
                } else {
                    Err(ValidationError::LoopCountOutOfRange(n))
                }
            }
        }
    }

    /// "inf" / "infinite" / "∞" or a count.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if matches!(s.to_ascii_lowercase().as_str(), "inf" | "infinite" | "∞") {
            return Ok(LoopMode::Infinite);
        }
        let n: i64 = s.parse().map_err(|_| ValidationError::Unparsable {
            what: "loop count",
            input: input.to_string(),
        })?;
        Self::from_settings(Some(n), false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSettings {
    pub mode: LoopMode,
    pub current_iteration: u32,
}

/// Corrected seek targets in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundaries {
    pub start_ms: u64,
    pub end_ms: u64,
}

pub fn boundaries(audio: &ChapterAudioFile, range: &VerseRange) -> Boundaries {
    let first_from = || audio.verse_timings.first().map_or(0, |t| t.timestamp_from);
    let start_ms = match range.start_verse {
        Some(v) if v > 1 => match audio.timing(v - 1) {
            Some(prev) => prev.timestamp_to + START_BUFFER_MS,
            None => audio.timing(v).map_or_else(first_from, |t| t.timestamp_from),
        },
        _ => audio.timing(1).map_or_else(first_from, |t| t.timestamp_from),
    };
    let end_ms = range
        .end_verse
        .and_then(|v| audio.timing(v))
        .map_or_else(|| audio.duration_ms(), |t| t.timestamp_to);
    Boundaries { start_ms, end_ms }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryAction {
    Continue,
    Pause,
    /// Seek back to the window start. `iteration` is `None` for infinite loops.
    Restart { to_ms: u64, iteration: Option<u32> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePolicy {
    range: VerseRange,
    looping: LoopSettings,
}

impl RangePolicy {
    pub fn range(&self) -> VerseRange {
        self.range
    }

    pub fn loop_settings(&self) -> LoopSettings {
        self.looping
    }

    pub fn set_range(&mut self, range: VerseRange) {
        self.range = range;
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.looping = LoopSettings { mode, current_iteration: 0 };
    }

    pub fn reset_iteration(&mut self) {
        self.looping.current_iteration = 0;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// A loop without a verse window repeats the whole chapter.
    pub fn is_active(&self) -> bool {
        self.range.is_bounded() || self.looping.mode != LoopMode::None
    }

    pub fn boundaries(&self, audio: &ChapterAudioFile) -> Boundaries {
        boundaries(audio, &self.range)
    }

    pub fn on_tick(&mut self, audio: &ChapterAudioFile, position_ms: u64) -> BoundaryAction {
        if !self.is_active() {
            return BoundaryAction::Continue;
        }
        let b = self.boundaries(audio);
        if position_ms < b.end_ms {
            return BoundaryAction::Continue;
        }
        match self.looping.mode {
            LoopMode::None => BoundaryAction::Pause,
            LoopMode::Infinite => BoundaryAction::Restart { to_ms: b.start_ms, iteration: None },
            LoopMode::Counted(n) => {
                self.looping.current_iteration += 1;
                let current = self.looping.current_iteration;
                if current < n {
                    BoundaryAction::Restart { to_ms: b.start_ms, iteration: Some(current) }
                } else {
                    BoundaryAction::Pause
                }
            }
        }
    }
}
