use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::ChapterAudioFile;

/// Where chapter audio metadata comes from.
#[allow(async_fn_in_trait)]
pub trait RecitationSource {
    async fn chapter_audio(&self, reciter_id: u32, chapter_id: u32) -> Result<ChapterAudioFile>;
}

pub fn audio_path(dir: &Path, chapter: u32) -> PathBuf {
    dir.join(format!("{:03}.mp3", chapter))
}

pub fn timings_path(dir: &Path, chapter: u32) -> PathBuf {
    dir.join(format!("{:03}.timings.json", chapter))
}

/// Reads what `download` wrote: one folder per reciter, so the reciter id is ignored.
#[derive(Debug, Clone)]
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecitationSource for LocalSource {
    async fn chapter_audio(&self, _reciter_id: u32, chapter_id: u32) -> Result<ChapterAudioFile> {
        let path = timings_path(&self.dir, chapter_id);
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let mut audio: ChapterAudioFile = serde_json::from_slice(&data)
            .with_context(|| format!("decode {}", path.display()))?;

        let local = Path::new(&audio.audio_url);
        if !audio.audio_url.starts_with("http") && local.is_relative() {
            audio.audio_url = self.dir.join(local).to_string_lossy().to_string();
        }
        audio.normalize();
        Ok(audio)
    }
}
