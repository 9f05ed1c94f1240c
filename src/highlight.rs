//! Maps a playback position onto the verse (and word) being recited.
//!
//! Intervals are half-open `[timestamp_from, timestamp_to)`, so a position on
//! a shared boundary belongs to the later verse. Past the end of the last
//! verse, and inside gaps between verses, the previous verse stays current;
//! the coordinator clears the highlight once the engine reports the audio
//! finished.

use std::collections::BTreeSet;

use crate::models::VerseTiming;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Highlight {
    pub verse_key: Option<String>,
    pub word_position: Option<u32>,
}

/// Highlight plus the verses already recited in this play-through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightState {
    pub verse_key: Option<String>,
    pub word_position: Option<u32>,
    pub completed_verse_keys: BTreeSet<String>,
}

impl HighlightState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn current(&self) -> Highlight {
        Highlight {
            verse_key: self.verse_key.clone(),
            word_position: self.word_position,
        }
    }
}

/// Index of the verse current at `position_ms`, if any.
pub fn verse_index(timings: &[VerseTiming], position_ms: u64) -> Option<usize> {
    // first verse starting after the position; the one before it is current
    let after = timings.partition_point(|t| t.timestamp_from <= position_ms);
    after.checked_sub(1)
}

pub fn project(timings: &[VerseTiming], position_ms: u64) -> Highlight {
    let Some(idx) = verse_index(timings, position_ms) else {
        return Highlight::default();
    };
    let verse = &timings[idx];
    let word_position = verse.contains(position_ms).then(|| word_at(verse, position_ms)).flatten();
    Highlight {
        verse_key: Some(verse.verse_key.clone()),
        word_position,
    }
}

fn word_at(verse: &VerseTiming, position_ms: u64) -> Option<u32> {
    let after = verse.segments.partition_point(|w| w.start_ms <= position_ms);
    let w = verse.segments.get(after.checked_sub(1)?)?;
    (position_ms < w.end_ms).then_some(w.position)
}

/// Verse keys whose whole interval lies before `position_ms`.
pub fn completed_before(timings: &[VerseTiming], position_ms: u64) -> BTreeSet<String> {
    timings
        .iter()
        .filter(|t| t.timestamp_to <= position_ms)
        .map(|t| t.verse_key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WordTiming;

    fn timing(key: &str, from: u64, to: u64) -> VerseTiming {
        VerseTiming {
            verse_key: key.into(),
            timestamp_from: from,
            timestamp_to: to,
            duration: None,
            segments: Vec::new(),
        }
    }

    fn table() -> Vec<VerseTiming> {
        vec![timing("1:1", 0, 1000), timing("1:2", 1000, 2500)]
    }

    #[test]
    fn boundary_belongs_to_later_verse() {
        let t = table();
        assert_eq!(project(&t, 999).verse_key.as_deref(), Some("1:1"));
        assert_eq!(project(&t, 1000).verse_key.as_deref(), Some("1:2"));
    }

    #[test]
    fn last_verse_holds_past_the_end() {
        let t = table();
        let h = project(&t, 2500);
        assert_eq!(h.verse_key.as_deref(), Some("1:2"));
        assert_eq!(h.word_position, None);
        assert_eq!(project(&t, 90_000).verse_key.as_deref(), Some("1:2"));
    }

    #[test]
    fn nothing_before_first_verse_or_without_data() {
        assert_eq!(project(&[], 0), Highlight::default());
        let t = vec![timing("2:1", 400, 900)];
        assert_eq!(project(&t, 399), Highlight::default());
        assert_eq!(project(&t, 400).verse_key.as_deref(), Some("2:1"));
    }

    #[test]
    fn gaps_hold_previous_verse() {
        let t = vec![timing("1:1", 0, 1000), timing("1:2", 1300, 2000)];
        let h = project(&t, 1100);
        assert_eq!(h.verse_key.as_deref(), Some("1:1"));
        assert_eq!(h.word_position, None);
    }

    #[test]
    fn word_positions_inside_verse() {
        let mut v = timing("1:1", 0, 3000);
        v.segments = vec![
            WordTiming { position: 1, start_ms: 0, end_ms: 800 },
            WordTiming { position: 2, start_ms: 800, end_ms: 1500 },
            WordTiming { position: 3, start_ms: 1800, end_ms: 3000 },
        ];
        let t = vec![v];
        assert_eq!(project(&t, 0).word_position, Some(1));
        assert_eq!(project(&t, 800).word_position, Some(2));
        assert_eq!(project(&t, 1600).word_position, None);
        assert_eq!(project(&t, 2999).word_position, Some(3));
        assert_eq!(project(&t, 3000).word_position, None);
    }

    #[test]
    fn completed_verses_are_fully_passed() {
        let t = table();
        assert!(completed_before(&t, 999).is_empty());
        assert_eq!(completed_before(&t, 1000).into_iter().collect::<Vec<_>>(), ["1:1"]);
        assert_eq!(completed_before(&t, 2500).len(), 2);
    }
}
