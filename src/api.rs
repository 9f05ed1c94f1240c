use crate::auth::TokenCache;
use crate::config::Config;
use crate::models::{Chapter, ChapterAudioFile, ChapterRecitationResponse, Reciter, Verse, VersesResponse};
use crate::source::RecitationSource;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::time::{sleep, Duration};

const MAX_RETRIES: u32 = 5;
const PER_PAGE: u32 = 50;
const WORD_FIELDS: &str = "text_uthmani";

#[derive(Debug, Clone, Default, Serialize)]
pub struct VersesQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub words: Option<bool>,
    pub translations: Option<u32>,
    pub word_fields: Option<String>,
    pub fields: Option<String>,
}

#[derive(Debug)]
pub struct QuranClient {
    http: Client,
    api_base: String,
    audio_base: String,
    auth: Option<TokenCache>,
}

impl QuranClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tartil/", env!("CARGO_PKG_VERSION")))
            .timeout(config.fetch_timeout())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            audio_base: config.audio_base.trim_end_matches('/').to_string(),
            auth: config.credentials().map(TokenCache::new),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn resolve_audio_url(&self, u: &str) -> String {
        if u.starts_with("http") {
            u.to_string()
        } else {
            format!("{}/{}", self.audio_base, u.trim_start_matches('/'))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &impl Serialize) -> Result<T> {
        let url = format!("{}{path}", self.api_base);
        let mut tries = 0u32;
        loop {
            let mut req = self.http.get(&url).query(query);
            if let Some(auth) = &self.auth {
                let token = auth.bearer(&self.http).await?;
                req = req.header("x-auth-token", token).header("x-client-id", auth.client_id());
            }
            let resp = req.send().await.with_context(|| format!("send failed: {url}"))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS && tries < MAX_RETRIES {
                let wait = Duration::from_millis(250 * (1 << tries));
                tracing::warn!(%url, ?wait, "rate limited, backing off");
                sleep(wait).await;
                tries += 1;
                continue;
            }

            let resp = resp
                .error_for_status()
                .with_context(|| format!("HTTP {status} for {url}"))?;
            return resp
                .json::<T>()
                .await
                .with_context(|| format!("decode response from {url} failed"));
        }
    }

    pub async fn fetch_chapters(&self) -> Result<Vec<Chapter>> {
        #[derive(Deserialize)] struct R { chapters: Vec<Chapter> }
        Ok(self.get_json::<R>("/chapters", &[("language", "en")]).await?.chapters)
    }

    pub async fn fetch_reciters(&self) -> Result<Vec<Reciter>> {
        #[derive(Deserialize)] struct R { recitations: Vec<Reciter> }
        Ok(self
            .get_json::<R>("/resources/recitations", &[("language", "en")])
            .await?
            .recitations)
    }

    /// All verses of a chapter with words and one translation, 50 per page.
    pub async fn fetch_verses(&self, chapter: u32, translation: Option<u32>) -> Result<Vec<Verse>> {
        let path = format!("/verses/by_chapter/{chapter}");
        let mut out = Vec::new();
        let mut page = 1u32;
        loop {
            let q = VersesQuery {
                page: Some(page),
                per_page: Some(PER_PAGE),
                words: Some(true),
                translations: translation,
                word_fields: Some(WORD_FIELDS.into()),
                fields: Some("text_uthmani,juz_number".into()),
            };
            let parsed: VersesResponse = self.get_json(&path, &q).await?;
            if parsed.verses.is_empty() { break; }
            out.extend(parsed.verses);
            match parsed.pagination.and_then(|p| p.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        tracing::debug!(chapter, verses = out.len(), "fetched verses");
        Ok(out)
    }

    pub async fn fetch_chapter_audio(&self, reciter: u32, chapter: u32) -> Result<ChapterAudioFile> {
        let path = format!("/chapter_recitations/{reciter}/{chapter}");
        let mut audio = self
            .get_json::<ChapterRecitationResponse>(&path, &[("segments", "true")])
            .await
            .with_context(|| format!("chapter audio for reciter {reciter}, chapter {chapter}"))?
            .audio_file;
        audio.audio_url = self.resolve_audio_url(&audio.audio_url);
        audio.normalize();
        if audio.verse_timings.is_empty() {
            tracing::warn!(reciter, chapter, "recitation has no verse timings; highlighting disabled");
        }
        Ok(audio)
    }
}

impl RecitationSource for QuranClient {
    async fn chapter_audio(&self, reciter_id: u32, chapter_id: u32) -> Result<ChapterAudioFile> {
        self.fetch_chapter_audio(reciter_id, chapter_id).await
    }
}
