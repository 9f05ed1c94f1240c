use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Chapters (surahs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: u32,
    pub name_simple: String,
    #[serde(default)]
    pub name_complex: String,
    #[serde(default)]
    pub name_arabic: String,
    #[serde(default)]
    pub verses_count: u32,
    #[serde(default)]
    pub revelation_place: Option<String>,
}

/// Reciters list (the "recitation id" used by the audio endpoints)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reciter {
    pub id: u32,
    #[serde(default)]
    pub reciter_name: String,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct VersesResponse {
    pub verses: Vec<Verse>,
    pub pagination: Option<Pagination>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Pagination {
    pub per_page: Option<u32>,
    pub current_page: Option<u32>,
    pub next_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub total_records: Option<u32>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Verse {
    pub id: u32,
    pub verse_number: u32,
    pub verse_key: String,
    pub juz_number: Option<u32>,
    // deprecated upstream, can be missing
    pub page_number: Option<u32>,
    #[serde(default)]
    pub text_uthmani: Option<String>,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub translations: Vec<Translation>,
}

impl Verse {
    /// Arabic text, rebuilt from the words when the verse-level field was not requested.
    pub fn arabic(&self) -> String {
        if let Some(t) = self.text_uthmani.as_deref().filter(|t| !t.is_empty()) {
            return t.to_string();
        }
        self.words
            .iter()
            .filter(|w| w.char_type_name.as_deref() != Some("end"))
            .filter_map(|w| w.text_uthmani.as_deref().or(w.text.as_deref()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Word {
    pub position: u32,
    #[serde(default)]
    pub char_type_name: Option<String>,
    #[serde(default)]
    pub text_uthmani: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transliteration: Option<TextField>,
    #[serde(default)]
    pub translation: Option<TextField>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TextField {
    pub text: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Translation {
    #[serde(default)]
    pub resource_id: Option<u32>,
    pub text: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ChapterRecitationResponse {
    pub audio_file: ChapterAudioFile,
}

/// One reciter's audio for a whole chapter plus its verse timing table.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChapterAudioFile {
    #[serde(default)]
    pub id: u32,
    pub chapter_id: u32,
    pub audio_url: String,
    #[serde(rename = "timestamps", alias = "verse_timings", default)]
    pub verse_timings: Vec<VerseTiming>,
}

impl ChapterAudioFile {
    /// Sort the timing table by start so lookups can binary search it.
    pub fn normalize(&mut self) {
        self.verse_timings.sort_by_key(|t| t.timestamp_from);
        for t in &mut self.verse_timings {
            t.segments.sort_by_key(|s| s.start_ms);
        }
    }

    pub fn verse_count(&self) -> u32 {
        self.verse_timings
            .iter()
            .filter_map(|t| t.key().ok().map(|k| k.verse))
            .max()
            .unwrap_or(0)
    }

    pub fn timing(&self, verse: u32) -> Option<&VerseTiming> {
        let idx = verse.checked_sub(1)? as usize;
        match self.verse_timings.get(idx) {
            Some(t) if t.key().is_ok_and(|k| k.verse == verse) => Some(t),
            _ => self
                .verse_timings
                .iter()
                .find(|t| t.key().is_ok_and(|k| k.verse == verse)),
        }
    }

    /// End of the last verse, or 0 without timings.
    pub fn duration_ms(&self) -> u64 {
        self.verse_timings
            .iter()
            .map(|t| t.timestamp_to)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct VerseTiming {
    pub verse_key: String,
    pub timestamp_from: u64,
    pub timestamp_to: u64,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default, deserialize_with = "word_segments")]
    pub segments: Vec<WordTiming>,
}

impl VerseTiming {
    pub fn key(&self) -> Result<VerseKey, VerseKeyError> {
        self.verse_key.parse()
    }

    pub fn contains(&self, position_ms: u64) -> bool {
        (self.timestamp_from..self.timestamp_to).contains(&position_ms)
    }
}

/// Word-level interval inside the chapter audio. `position` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordTiming {
    pub position: u32,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Serialize for WordTiming {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        [u64::from(self.position), self.start_ms, self.end_ms].serialize(ser)
    }
}

// Accept either [position,start,end] or [from,to,start,end]; anything else is dropped.
fn word_segments<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<WordTiming>, D::Error> {
    let raw: Option<Vec<Vec<f64>>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|seg| {
            let (position, s, e) = match seg.as_slice() {
                [p, s, e] => (*p as u32, *s, *e),
                [i, _j, s, e] => (*i as u32 + 1, *s, *e),
                _ => return None,
            };
            let (start_ms, end_ms) = (s.max(0.0) as u64, e.max(0.0) as u64);
            (end_ms > start_ms && position > 0).then_some(WordTiming { position, start_ms, end_ms })
        })
        .collect())
}

/// `"chapter:verse"`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VerseKey {
    pub chapter: u32,
    pub verse: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed verse key {0:?}")]
pub struct VerseKeyError(pub String);

impl FromStr for VerseKey {
    type Err = VerseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || VerseKeyError(s.to_string());
        let (c, v) = s.split_once(':').ok_or_else(bad)?;
        let chapter = c.trim().parse().map_err(|_| bad())?;
        let verse = v.trim().parse().map_err(|_| bad())?;
        Ok(VerseKey { chapter, verse })
    }
}

impl fmt::Display for VerseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.verse)
    }
}
