use anyhow::{Context, Result};
use reqwest::Client;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::time::Duration;

use crate::engine::{EngineEvent, MediaEngine, MediaSource};

/// Plays chapter audio on the default output device. The whole file is
/// fetched into memory first so seeking works on remote recitations too.
pub struct RodioEngine {
    http: Client,
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    // kept to re-queue the track after it played out
    bytes: Vec<u8>,
    duration_ms: u64,
    finished: bool,
}

impl RodioEngine {
    pub fn new(http: Client) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .context("Failed to create audio output stream")?;
        Ok(Self {
            http,
            _stream: stream,
            handle,
            sink: None,
            bytes: Vec::new(),
            duration_ms: 0,
            finished: false,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http") {
            let bytes = self.http.get(url).send().await?
                .error_for_status()
                .with_context(|| format!("GET {url}"))?
                .bytes().await?;
            Ok(bytes.to_vec())
        } else {
            tokio::fs::read(url).await.with_context(|| format!("read {url}"))
        }
    }
}

impl MediaEngine for RodioEngine {
    async fn load(&mut self, media: &MediaSource) -> Result<u64> {
        self.release();
        let bytes = self.fetch(&media.url).await?;
        let source = Decoder::new(Cursor::new(bytes.clone())).context("Failed to decode audio file")?;
        let probed = source.total_duration().map(|d| d.as_millis() as u64);

        let sink = Sink::try_new(&self.handle).context("Failed to create audio sink")?;
        sink.pause();
        sink.append(source);
        self.sink = Some(sink);
        self.bytes = bytes;
        self.duration_ms = probed.unwrap_or(media.duration_hint_ms);
        tracing::debug!(url = %media.url, duration_ms = self.duration_ms, probed = probed.is_some(), "rodio loaded");
        Ok(self.duration_ms)
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            self.finished = false;
            sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn seek(&mut self, position_ms: u64) {
        if let Some(sink) = &self.sink {
            if sink.empty() {
                // played out: queue the track again, the caller decides whether it plays
                match Decoder::new(Cursor::new(self.bytes.clone())) {
                    Ok(source) => {
                        sink.pause();
                        sink.append(source);
                        self.finished = false;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot re-queue audio");
                        return;
                    }
                }
            }
            if let Err(e) = sink.try_seek(Duration::from_millis(position_ms)) {
                tracing::warn!(position_ms, error = %e, "seek failed");
            }
        }
    }

    fn position_ms(&self) -> u64 {
        self.sink.as_ref().map_or(0, |s| s.get_pos().as_millis() as u64)
    }

    fn poll(&mut self) -> Vec<EngineEvent> {
        let Some(sink) = &self.sink else { return Vec::new() };
        let mut events = vec![EngineEvent::Position(self.position_ms())];
        if sink.empty() && !self.finished {
            self.finished = true;
            events.push(EngineEvent::Finished);
        }
        events
    }

    fn release(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.bytes.clear();
        self.duration_ms = 0;
        self.finished = false;
    }
}
