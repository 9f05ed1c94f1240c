//! Drives a coordinator: position ticks, user commands and Ctrl-C are handled
//! one at a time by a single `select!` loop, so the coordinator never sees
//! concurrent calls.

use std::str::FromStr;

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::coordinator::{PlaybackCoordinator, PlaybackState, Snapshot};
use crate::engine::MediaEngine;
use crate::error::ValidationError;
use crate::range::{LoopMode, VerseRange};
use crate::source::RecitationSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    Seek(u64),
    Verse(u32),
    /// Raw bounds; checked against the loaded chapter when applied.
    Range(Option<u32>, Option<u32>),
    ClearRange,
    Loop(LoopMode),
    ClearLoop,
    Reciter(u32),
    Chapter(u32),
    Reset,
    Quit,
}

impl FromStr for Command {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::Unparsable { what: "command", input: s.to_string() };
        let mut parts = s.split_whitespace();
        let word = parts.next().ok_or_else(bad)?.to_ascii_lowercase();
        let arg = parts.next();
        let number = |what: &'static str| -> Result<u32, ValidationError> {
            arg.and_then(|a| a.parse().ok())
                .ok_or_else(|| ValidationError::Unparsable { what, input: arg.unwrap_or_default().to_string() })
        };
        Ok(match word.as_str() {
            "play" | "p" => Command::Play,
            "pause" => Command::Pause,
            "toggle" | "t" => Command::Toggle,
            "seek" | "s" => Command::Seek(u64::from(number("position")?)),
            "verse" | "v" => Command::Verse(number("verse")?),
            "range" | "r" => {
                // total verses is unknown here; validated by the coordinator
                let r = VerseRange::parse(arg.unwrap_or_default(), u32::MAX)?;
                Command::Range(r.start_verse, r.end_verse)
            }
            "clear-range" => Command::ClearRange,
            "loop" | "l" => Command::Loop(LoopMode::parse(arg.unwrap_or_default())?),
            "clear-loop" => Command::ClearLoop,
            "reciter" => Command::Reciter(number("reciter")?),
            "chapter" => Command::Chapter(number("chapter")?),
            "reset" => Command::Reset,
            "quit" | "q" | "exit" => Command::Quit,
            _ => return Err(bad()),
        })
    }
}

pub struct Session<S: RecitationSource, E: MediaEngine> {
    coordinator: PlaybackCoordinator<S, E>,
    tick: Duration,
    /// Leave the loop as soon as playback stops on its own.
    exit_when_stopped: bool,
}

impl<S: RecitationSource, E: MediaEngine> Session<S, E> {
    pub fn new(coordinator: PlaybackCoordinator<S, E>, tick: Duration, exit_when_stopped: bool) -> Self {
        Self { coordinator, tick, exit_when_stopped }
    }

    pub fn coordinator(&mut self) -> &mut PlaybackCoordinator<S, E> {
        &mut self.coordinator
    }

    /// Apply one command. Returns `false` when the session should end.
    pub async fn apply(&mut self, cmd: Command) -> bool {
        debug!(?cmd, "session command");
        let c = &mut self.coordinator;
        let outcome = match cmd {
            Command::Quit => return false,
            Command::Play => c.play().await.map_err(|e| e.to_string()),
            Command::Pause => {
                c.pause();
                Ok(())
            }
            Command::Toggle => c.toggle().await.map_err(|e| e.to_string()),
            Command::Seek(ms) => {
                c.seek_to(ms);
                Ok(())
            }
            Command::Verse(v) => c.seek_to_verse(v).map_err(|e| e.to_string()),
            Command::Range(start, end) => c.set_verse_range(start, end).map_err(|e| e.to_string()),
            Command::ClearRange => {
                c.clear_verse_range();
                Ok(())
            }
            Command::Loop(mode) => {
                c.set_loop_mode(mode);
                Ok(())
            }
            Command::ClearLoop => {
                c.clear_loop_settings();
                Ok(())
            }
            Command::Reciter(id) => c.select_reciter(id).await.map_err(|e| e.to_string()),
            Command::Chapter(id) => c.load_chapter(id).await.map_err(|e| e.to_string()),
            Command::Reset => {
                c.reset();
                Ok(())
            }
        };
        if let Err(msg) = outcome {
            // already published as an event; the session keeps running
            warn!(%msg, "command failed");
        }
        true
    }

    /// Run until `Quit`, Ctrl-C, or (when configured) playback stopping by itself.
    /// The coordinator is reset on the way out.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Snapshot {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.coordinator.tick();
                    if self.exit_when_stopped && self.stopped() {
                        break;
                    }
                }
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => {
                        if !self.apply(cmd).await {
                            break;
                        }
                    }
                    None => commands_open = false,
                },
                _ = &mut shutdown => {
                    debug!("interrupted");
                    break;
                }
            }
        }

        let last = self.coordinator.snapshot();
        self.coordinator.reset();
        last
    }

    fn stopped(&self) -> bool {
        matches!(
            self.coordinator.state(),
            PlaybackState::Paused | PlaybackState::Error(_)
        )
    }
}
