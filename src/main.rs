use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};

use owo_colors::OwoColorize;

use tartil::api::QuranClient;
use tartil::config::Config;
use tartil::coordinator::{PlaybackCoordinator, PlaybackEvent, PlaybackState};
use tartil::engine::MediaEngine;
use tartil::lookup;
use tartil::models::{Chapter, Reciter};
use tartil::session::{Command, Session};
use tartil::source::{LocalSource, RecitationSource};

#[derive(Parser)]
#[command(
    name = "tartil",
    version,
    about = "Follow a Quran recitation verse by verse, with verse windows and repeat loops for hifz",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List chapters or reciters
    Ls {
        #[arg(value_enum)] what: ListWhat,
    },
    /// Print a chapter's verses with a translation
    Read {
        #[arg(long)] chapter: String,
        /// Translation resource id (20 = Saheeh International)
        #[arg(long, default_value_t = 20)] translation: u32,
    },
    /// Print a recitation's verse timing table
    Timings {
        #[arg(long)] chapter: String,
        #[arg(long)] reciter: String,
    },
    /// Save chapter audio + timings for offline playback
    Download {
        #[arg(long)] reciter: String,
        #[arg(long)] chapter: String,
        #[arg(long, default_value = "~/Music/Quran_hifz")] out: String,
        #[arg(long, default_value_t = false)] force: bool,
    },
    /// Play a chapter and follow the highlighted verse
    Play {
        #[arg(long)] chapter: String,
        /// Required unless --offline is given
        #[arg(long)] reciter: Option<String>,
        /// First verse of the window
        #[arg(long)] from: Option<u32>,
        /// Last verse of the window
        #[arg(long)] to: Option<u32>,
        /// Play the window this many times (1-100)
        #[arg(long, allow_negative_numbers = true, conflicts_with = "infinite")] repeat: Option<i64>,
        /// Repeat the window until stopped
        #[arg(long, default_value_t = false)] infinite: bool,
        /// Folder written by `download` for this reciter
        #[arg(long)] offline: Option<String>,
        /// Read commands (play, pause, seek, verse, range, loop, quit, ...) from stdin
        #[arg(long, short, default_value_t = false)] interactive: bool,
        /// Translation shown next to the highlighted verse; 0 to hide
        #[arg(long, default_value_t = 20)] translation: u32,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ListWhat { Chapters, Reciters }

// ---------- small UI helpers ----------
fn expand_tilde(p: &str) -> String {
    if let Some(rest) = p.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest).to_string_lossy().to_string();
        }
    }
    p.to_string()
}

fn label(s: &str) -> String { s.dimmed().to_string() }

// translations come with <sup foot_note=..> markup
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut in_sup = false;
    let mut tag = String::new();
    for ch in s.chars() {
        match ch {
            '<' => { depth += 1; tag.clear(); }
            '>' if depth > 0 => {
                depth -= 1;
                if tag.starts_with("sup") { in_sup = true; }
                if tag.starts_with("/sup") { in_sup = false; }
            }
            _ if depth > 0 => tag.push(ch),
            _ if !in_sup => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn init_logging() {
    let filter = std::env::var("TARTIL_LOG").unwrap_or_else(|_| "warn".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn chapter_for(client: &QuranClient, query: &str) -> Result<Chapter> {
    let chapters = client.fetch_chapters().await?;
    lookup::resolve_chapter(&chapters, query)
        .cloned()
        .with_context(|| format!("{} {}", "Unknown chapter:".red().bold(), query.bold()))
}

async fn reciter_for(client: &QuranClient, query: &str) -> Result<Reciter> {
    let reciters = client.fetch_reciters().await?;
    lookup::resolve_reciter(&reciters, query)
        .cloned()
        .with_context(|| format!("{} {}", "Unknown reciter:".red().bold(), query.bold()))
}

fn print_chapter_header(c: &Chapter) {
    println!(
        "{} {}",
        c.name_complex.bold().cyan(),
        format!("({:03} · {} · {} verses)", c.id, c.name_simple, c.verses_count).dimmed()
    );
}

// ---------- play ----------
struct PlayOptions {
    chapter: u32,
    reciter: u32,
    from: Option<u32>,
    to: Option<u32>,
    repeat: Option<i64>,
    infinite: bool,
    interactive: bool,
}

/// verse_key -> (arabic, translation)
type VerseTexts = HashMap<String, (String, Option<String>)>;

async fn verse_texts(client: &QuranClient, chapter: u32, translation: u32) -> VerseTexts {
    let translation = (translation != 0).then_some(translation);
    match client.fetch_verses(chapter, translation).await {
        Ok(verses) => verses
            .into_iter()
            .map(|v| {
                let tr = v.translations.first().map(|t| strip_tags(&t.text));
                let arabic = v.arabic();
                (v.verse_key, (arabic, tr))
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "verse text unavailable, showing keys only");
            HashMap::new()
        }
    }
}

async fn print_events(mut rx: broadcast::Receiver<PlaybackEvent>, texts: VerseTexts) {
    let mut last_verse: Option<String> = None;
    loop {
        let ev = match rx.recv().await {
            Ok(ev) => ev,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match ev {
            PlaybackEvent::StateChanged(PlaybackState::Playing) => println!("{}", "▶ playing".green()),
            PlaybackEvent::StateChanged(PlaybackState::Paused) => println!("{}", "⏸ paused".yellow()),
            PlaybackEvent::StateChanged(PlaybackState::Loading) => println!("{}", label("loading…")),
            PlaybackEvent::StateChanged(_) => {}
            PlaybackEvent::Highlight(h) => {
                if h.verse_key == last_verse { continue; }
                last_verse = h.verse_key.clone();
                let Some(key) = h.verse_key else { continue };
                match texts.get(&key) {
                    Some((arabic, tr)) => {
                        println!("{} {}", format!("[{key}]").magenta().bold(), arabic.bold());
                        if let Some(tr) = tr { println!("        {}", tr.dimmed()); }
                    }
                    None => println!("{}", format!("[{key}]").magenta().bold()),
                }
            }
            PlaybackEvent::LoopRestarted { iteration, .. } => match iteration {
                Some(i) => println!("{} {}", "↻".cyan().bold(), format!("repeat {}", i + 1).bold()),
                None => println!("{} {}", "↻".cyan().bold(), "repeat".bold()),
            },
            PlaybackEvent::ValidationFailed(e) => println!("{} {}", "✖".yellow().bold(), e.to_string().yellow()),
            PlaybackEvent::Error(msg) => println!("{} {}", "✖".red().bold(), msg.red()),
            PlaybackEvent::Progress { .. } | PlaybackEvent::VerseCompleted(_) => {}
        }
    }
}

fn spawn_stdin_commands(tx: mpsc::Sender<Command>) {
    // a plain thread: a blocked stdin read must not hold up runtime shutdown
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() { continue; }
            match line.parse::<Command>() {
                Ok(cmd) => {
                    let quit = cmd == Command::Quit;
                    if tx.blocking_send(cmd).is_err() || quit { break; }
                }
                Err(e) => eprintln!("{} {}", "✖".yellow().bold(), e.to_string().yellow()),
            }
        }
    });
}

async fn run_play<S: RecitationSource, E: MediaEngine>(
    source: S,
    engine: E,
    config: &Config,
    opts: PlayOptions,
    texts: VerseTexts,
) -> Result<()> {
    let mut coordinator = PlaybackCoordinator::new(source, engine, opts.reciter, config.fetch_timeout());
    let printer = tokio::spawn(print_events(coordinator.subscribe(), texts));

    coordinator.load_chapter(opts.chapter).await?;
    if opts.from.is_some() || opts.to.is_some() {
        coordinator.set_verse_range(opts.from, opts.to)?;
    }
    if opts.repeat.is_some() || opts.infinite {
        coordinator.set_loop_settings(opts.repeat, opts.infinite)?;
    }
    coordinator.play().await?;

    let (tx, rx) = mpsc::channel(16);
    if opts.interactive {
        spawn_stdin_commands(tx);
    } else {
        drop(tx);
    }

    let last = Session::new(coordinator, config.tick(), !opts.interactive).run(rx).await;
    // the coordinator is gone, so the printer sees the channel close
    let _ = printer.await;

    println!(
        "   {} {}  {} {}",
        label("Stopped at:"),
        format!("{:.1}s", last.position_ms as f64 / 1000.0).bold(),
        label("Verses done:"),
        last.highlight.completed_verse_keys.len().to_string().bold()
    );
    if let PlaybackState::Error(msg) = last.state {
        anyhow::bail!(msg);
    }
    Ok(())
}

#[cfg(feature = "audio")]
fn engine(client: &QuranClient) -> Result<tartil::rodio_engine::RodioEngine> {
    tartil::rodio_engine::RodioEngine::new(client.http().clone())
}

#[cfg(not(feature = "audio"))]
fn engine(_client: &QuranClient) -> Result<tartil::engine::ClockEngine> {
    tracing::info!("built without the `audio` feature; following along silently");
    Ok(tartil::engine::ClockEngine::new())
}

// ---------- main ----------
#[tokio::main]
async fn main() -> Result<()> {
    // Respect NO_COLOR if the user wants plain output (owo-colors honors OWO_COLORS=0)
    if std::env::var_os("NO_COLOR").is_some() {
        unsafe {
            std::env::set_var("OWO_COLORS", "0");
        }
    }

    let cli = Cli::parse();
    init_logging();
    let config = cli.config;
    let client = QuranClient::new(&config)?;

    match cli.cmd {
        Cmd::Ls { what } => match what {
            ListWhat::Chapters => {
                let ch = client.fetch_chapters().await?;
                println!("{}", "Chapters".bold().cyan());
                for c in ch {
                    let id_text = format!("{:>3}", c.id);
                    let simple_text = format!("[{}]", c.name_simple);
                    println!(
                        "{}  {}  {}",
                        id_text.magenta().bold(),
                        c.name_complex.bold(),
                        simple_text.dimmed(),
                    );
                }
            }
            ListWhat::Reciters => {
                let rs = client.fetch_reciters().await?;
                println!("{}", "Reciters".bold().magenta());
                for r in rs {
                    let id_text = format!("{:>3}", r.id);
                    match r.style.as_deref().filter(|s| !s.is_empty()) {
                        Some(style) => println!(
                            "{}  {}  {}",
                            id_text.magenta().bold(),
                            r.reciter_name.bold(),
                            format!("({})", style).dimmed(),
                        ),
                        None => println!("{}  {}", id_text.magenta().bold(), r.reciter_name.bold()),
                    }
                }
            }
        },

        Cmd::Read { chapter, translation } => {
            let c = chapter_for(&client, &chapter).await?;
            print_chapter_header(&c);
            let translation = (translation != 0).then_some(translation);
            for v in client.fetch_verses(c.id, translation).await? {
                println!("{} {}", format!("{:>3}", v.verse_number).magenta().bold(), v.arabic().bold());
                if let Some(t) = v.translations.first() {
                    println!("    {}", strip_tags(&t.text).dimmed());
                }
            }
        }

        Cmd::Timings { chapter, reciter } => {
            let c = chapter_for(&client, &chapter).await?;
            let r = reciter_for(&client, &reciter).await?;
            let audio = client.fetch_chapter_audio(r.id, c.id).await?;
            print_chapter_header(&c);
            println!("   {} {}", label("Reciter:"), r.reciter_name.bold().magenta());
            println!("   {} {}", label("Audio:"), audio.audio_url.blue());
            for t in &audio.verse_timings {
                println!(
                    "{:>8}  {:>9} → {:<9} {}",
                    t.verse_key.magenta().bold(),
                    t.timestamp_from,
                    t.timestamp_to,
                    format!("{} words", t.segments.len()).dimmed()
                );
            }
        }

        Cmd::Download { reciter, chapter, out, force } => {
            let c = chapter_for(&client, &chapter).await?;
            let r = reciter_for(&client, &reciter).await?;
            let dir = PathBuf::from(expand_tilde(&out)).join(lookup::reciter_slug(&r));

            println!(
                "{} {} {}",
                label("Downloading →"),
                c.name_complex.bold().cyan(),
                format!("({:03} · {})", c.id, c.name_simple).dimmed()
            );
            println!("   {} {}", label("Reciter:"), r.reciter_name.bold().magenta());
            println!("   {} {}", label("Folder:"), dir.display().to_string().bold().blue());

            let mp3 = tartil::download::download_chapter(&client, r.id, c.id, &dir, force).await?;
            println!("{} {} {}", "✔".green().bold(), "Saved".bold(), mp3.display().to_string().bold().blue());
            println!(
                "   {} {}",
                label("Play with:"),
                format!("tartil play --chapter {} --offline {}", c.id, dir.display()).bold()
            );
        }

        Cmd::Play { chapter, reciter, from, to, repeat, infinite, offline, interactive, translation } => {
            let engine = engine(&client)?;
            match offline {
                Some(dir) => {
                    let chapter_id = chapter.trim().parse::<u32>()
                        .with_context(|| format!("{} {}", "--offline needs a chapter number, got".red().bold(), chapter.bold()))?;
                    let opts = PlayOptions { chapter: chapter_id, reciter: 0, from, to, repeat, infinite, interactive };
                    let source = LocalSource::new(expand_tilde(&dir));
                    run_play(source, engine, &config, opts, HashMap::new()).await?;
                }
                None => {
                    let rec = reciter.as_deref()
                        .ok_or_else(|| anyhow::anyhow!("{}", "--reciter is required without --offline".yellow().bold()))?;
                    let c = chapter_for(&client, &chapter).await?;
                    let r = reciter_for(&client, rec).await?;
                    print_chapter_header(&c);
                    println!("   {} {}", label("Reciter:"), r.reciter_name.bold().magenta());
                    let texts = verse_texts(&client, c.id, translation).await;
                    let opts = PlayOptions { chapter: c.id, reciter: r.id, from, to, repeat, infinite, interactive };
                    run_play(client, engine, &config, opts, texts).await?;
                }
            }
        }
    }

    Ok(())
}
