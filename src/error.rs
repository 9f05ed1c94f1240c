use thiserror::Error;

/// Rejected verse-range / loop input. The previous configuration is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no chapter is loaded")]
    NoChapter,
    #[error("verse {verse} is outside 1..={total}")]
    VerseOutOfRange { verse: u32, total: u32 },
    #[error("start verse {start} is after end verse {end}")]
    InvertedRange { start: u32, end: u32 },
    #[error("loop count {0} is outside 1..=100")]
    LoopCountOutOfRange(i64),
    #[error("a loop count cannot be combined with infinite looping")]
    ConflictingLoopMode,
    #[error("cannot parse {what}: {input:?}")]
    Unparsable { what: &'static str, input: String },
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("media error: {0}")]
    Media(String),
    #[error("playback is in an error state: {0}")]
    Unrecoverable(String),
}
