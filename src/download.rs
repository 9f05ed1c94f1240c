use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

use crate::api::QuranClient;
use crate::source::{audio_path, timings_path};

/// Save one reciter's chapter audio plus its timing sidecar under `dir`, so
/// `LocalSource` can play it back without the API.
pub async fn download_chapter(
    client: &QuranClient,
    reciter: u32,
    chapter: u32,
    dir: &Path,
    force: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).await
        .with_context(|| format!("create {}", dir.display()))?;

    let mut audio = client.fetch_chapter_audio(reciter, chapter).await
        .with_context(|| format!("fetch_chapter_audio failed for surah {}", chapter))?;

    let mp3 = audio_path(dir, chapter);
    if force || !mp3.exists() {
        let url = audio.audio_url.clone();
        let resp = client.http().get(&url).send().await?
            .error_for_status()
            .with_context(|| format!("GET {}", url))?;

        let bar = match resp.content_length() {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}")
                .context("progress template")?
                .progress_chars("=> "),
        );
        bar.set_message(format!("surah {:03}", chapter));

        // write to a temp name so an interrupted download never looks complete
        let partial = mp3.with_extension("mp3.part");
        let mut f = fs::File::create(&partial).await?;
        let mut s = resp.bytes_stream();
        while let Some(chunk) = s.next().await {
            let chunk = chunk.with_context(|| format!("read {}", url))?;
            f.write_all(&chunk).await?;
            bar.inc(chunk.len() as u64);
        }
        f.flush().await?;
        fs::rename(&partial, &mp3).await?;
        bar.finish_and_clear();
        tracing::info!(chapter, reciter, path = %mp3.display(), "audio saved");
    } else {
        tracing::debug!(path = %mp3.display(), "audio already present");
    }

    // the sidecar points at the local file, relative to the folder
    audio.audio_url = mp3
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let data = serde_json::to_vec_pretty(&audio)?;
    fs::write(timings_path(dir, chapter), data).await?;

    Ok(mp3)
}
