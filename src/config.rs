use clap::Args;
use std::time::Duration;

use crate::auth::Credentials;

pub const DEFAULT_API_BASE: &str = "https://api.quran.com/api/v4";
pub const DEFAULT_AUDIO_BASE: &str = "https://audio.qurancdn.com";
pub const DEFAULT_OAUTH_URL: &str = "https://oauth2.quran.foundation";

/// Runtime knobs, from flags or `TARTIL_*` environment variables.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Content API base URL
    #[arg(long, global = true, env = "TARTIL_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Base for relative audio paths returned by the API
    #[arg(long, global = true, env = "TARTIL_AUDIO_BASE", default_value = DEFAULT_AUDIO_BASE)]
    pub audio_base: String,

    /// Deadline for chapter/reciter metadata fetches, in seconds
    #[arg(long, global = true, env = "TARTIL_FETCH_TIMEOUT_SECS", default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    /// Position polling cadence during playback, in milliseconds
    #[arg(long, global = true, env = "TARTIL_TICK_MS", default_value_t = 250)]
    pub tick_ms: u64,

    #[arg(long, global = true, env = "TARTIL_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, global = true, env = "TARTIL_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, global = true, env = "TARTIL_OAUTH_URL", default_value = DEFAULT_OAUTH_URL)]
    pub oauth_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            audio_base: DEFAULT_AUDIO_BASE.into(),
            fetch_timeout_secs: 15,
            tick_ms: 250,
            client_id: None,
            client_secret: None,
            oauth_url: DEFAULT_OAUTH_URL.into(),
        }
    }
}

impl Config {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.clamp(20, 2000))
    }

    /// Both id and secret are needed; either alone means anonymous access.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(Credentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
                oauth_url: self.oauth_url.clone(),
            }),
            _ => None,
        }
    }
}
