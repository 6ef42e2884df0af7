//! Catmatch Daemon - runs experiment sessions for remote presentation clients
//!
//! Every TCP connection is one participant session. The client says `Hello`,
//! then receives screens, stimuli and feedback as newline-delimited JSON and
//! sends back key presses. Sessions run on blocking worker threads.
//!
//! Storage locations:
//! - Linux: ~/.local/share/catmatch/
//! - Windows: %APPDATA%\catmatch\
//! - MacOS: ~/Library/Application Support/catmatch/

use catmatch::clock::SystemClock;
use catmatch::config::ExperimentConfig;
use catmatch::error::{ConfigError, PackError, PoolError, SessionError};
use catmatch::log::CsvFileSink;
use catmatch::pack::PackListing;
use catmatch::pools::StimulusPools;
use catmatch::prng::Prng;
use catmatch::session::{Session, SessionSummary, Termination};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

mod bridge;
mod paths;

use bridge::{ClientMessage, DaemonEvent, Input, RemotePresentation};
use paths::AppPaths;

const LISTEN_ADDR: &str = "127.0.0.1:9877";
const DEFAULT_PACK: &str = "stimuli/pack_shapes_2";

#[derive(Debug, Error)]
enum DaemonError {
    #[error("{0}")]
    Paths(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session {0} is already running")]
    Busy(String),

    #[error("session worker failed: {0}")]
    Worker(String),
}

/// Sessions currently running, keyed by their log file name.
#[derive(Debug, Default)]
struct ActiveSessions {
    keys: HashSet<String>,
}

impl ActiveSessions {
    /// Reserve the log of `participant`/`session`; fails while another
    /// connection writes to the same file.
    fn claim(&mut self, participant: &str, session: &str) -> Result<String, DaemonError> {
        let key = AppPaths::session_key(participant, session);
        if !self.keys.insert(key.clone()) {
            return Err(DaemonError::Busy(key));
        }
        Ok(key)
    }

    fn release(&mut self, key: &str) {
        self.keys.remove(key);
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

struct DaemonState {
    paths: AppPaths,
    config: ExperimentConfig,
    listing: PackListing,
    active: ActiveSessions,
}

impl DaemonState {
    fn load(paths: AppPaths, pack_dir: PathBuf) -> Result<Self, DaemonError> {
        let config_file = paths.config_file();
        let config = if config_file.exists() {
            info!("Loading config from {:?}", config_file);
            ExperimentConfig::load(&config_file)?
        } else {
            info!("No config at {:?}; using defaults", config_file);
            ExperimentConfig::default()
        };
        let listing = PackListing::scan(&pack_dir, config.categories, config.difficulty_levels)?;

        // Build once so a degenerate pack is reported at startup, not mid-session.
        StimulusPools::from_listing(&listing, &config, &mut Prng::new(0))?;
        info!("Stimulus pack {:?} ready", pack_dir);

        Ok(Self {
            paths,
            config,
            listing,
            active: ActiveSessions::default(),
        })
    }
}

fn run_session(
    config: ExperimentConfig,
    listing: PackListing,
    log_path: PathBuf,
    events: mpsc::UnboundedSender<DaemonEvent>,
    keys: std::sync::mpsc::Receiver<Input>,
) -> Result<SessionSummary, DaemonError> {
    let mut rng = config.seed.map(Prng::new).unwrap_or_else(Prng::from_entropy);
    let pools = StimulusPools::from_listing(&listing, &config, &mut rng)?;
    let presentation =
        RemotePresentation::new(events, keys, &config.abort_key, config.animation_duration());
    let mut session = Session::new(
        config,
        pools,
        presentation,
        SystemClock::new(),
        CsvFileSink::new(log_path),
    )
    .with_rng(rng);
    Ok(session.run()?)
}

async fn write_event(
    writer: &mut OwnedWriteHalf,
    event: &DaemonEvent,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    writer
        .write_all(serde_json::to_string(event)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Client Handler
// ═══════════════════════════════════════════════════════════════════════════

async fn handle_client(
    stream: TcpStream,
    state: Arc<RwLock<DaemonState>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (participant, session) = loop {
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(ClientMessage::Hello {
                participant,
                session,
            }) => break (participant, session),
            Ok(other) => {
                let message = format!("Expected Hello, got {:?}", other);
                write_event(&mut writer, &DaemonEvent::Error { message }).await?;
            }
            Err(e) => {
                let message = format!("Invalid message: {}", e);
                write_event(&mut writer, &DaemonEvent::Error { message }).await?;
            }
        }
    };

    let claimed = {
        let mut s = state.write().await;
        s.active.claim(&participant, &session).map(|key| {
            let log_path = s.paths.session_log(&key);
            (key, s.config.clone(), s.listing.clone(), log_path)
        })
    };
    let (key, config, listing, log_path) = match claimed {
        Ok(claimed) => claimed,
        Err(e) => {
            warn!("Rejected {}/{}: {}", participant, session, e);
            let message = e.to_string();
            write_event(&mut writer, &DaemonEvent::Error { message }).await?;
            return Ok(());
        }
    };
    info!("Session {} started; log at {:?}", key, log_path);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (key_tx, key_rx) = std::sync::mpsc::channel();
    let worker = tokio::task::spawn_blocking(move || {
        run_session(config, listing, log_path, event_tx, key_rx)
    });

    let mut key_tx = Some(key_tx);
    let mut client_open = true;
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => {
                    if client_open && write_event(&mut writer, &event).await.is_err() {
                        warn!("Session {}: client stopped reading", key);
                        client_open = false;
                        key_tx = None;
                    }
                }
                None => break,
            },
            line = lines.next_line(), if client_open => match line {
                Ok(Some(line)) => {
                    let input = match serde_json::from_str::<ClientMessage>(&line) {
                        Ok(ClientMessage::Key { key: pressed }) => Some(Input::Key(pressed)),
                        Ok(ClientMessage::Abort) => Some(Input::Abort),
                        Ok(ClientMessage::Hello { .. }) => None,
                        Err(e) => {
                            warn!("Session {}: invalid message: {}", key, e);
                            None
                        }
                    };
                    if let (Some(input), Some(tx)) = (input, key_tx.as_ref()) {
                        let _ = tx.send(input);
                    }
                }
                Ok(None) | Err(_) => {
                    info!("Session {}: client disconnected", key);
                    client_open = false;
                    key_tx = None;
                }
            },
        }
    }

    let outcome = match worker.await {
        Ok(result) => result,
        Err(e) => {
            error!("Session {} worker panicked: {}", key, e);
            Err(DaemonError::Worker(e.to_string()))
        }
    };
    state.write().await.active.release(&key);

    let event = match outcome {
        Ok(summary) => {
            info!(
                "Session {} finished: {:?}, {} trials, bonus {:.2}",
                key,
                summary.termination,
                summary.practice_trials + summary.test_trials,
                summary.score
            );
            DaemonEvent::Finished {
                trials: summary.practice_trials + summary.test_trials,
                bonus: summary.score,
                aborted: summary.termination == Termination::Aborted,
            }
        }
        Err(e) => {
            error!("Session {} failed: {}", key, e);
            DaemonEvent::Error {
                message: e.to_string(),
            }
        }
    };
    if client_open {
        write_event(&mut writer, &event).await?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let paths = AppPaths::new().map_err(DaemonError::Paths)?;
    info!("Data directory: {:?}", paths.data_dir());

    let pack_dir = std::env::var("CATMATCH_PACK")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PACK));
    let state = Arc::new(RwLock::new(DaemonState::load(paths, pack_dir)?));

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let s = state.read().await;
                if !s.active.is_empty() {
                    warn!("Ctrl-C with {} session(s) still running", s.active.len());
                }
                info!("Ctrl-C: shutting down");
                std::process::exit(0);
            }
        });
    }

    let listener = TcpListener::bind(LISTEN_ADDR).await?;
    info!("Catmatch daemon listening on {}", LISTEN_ADDR);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let state_clone = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state_clone).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_ids_cannot_run_at_once() {
        let mut active = ActiveSessions::default();
        let key = active.claim("p.1", "s").unwrap();
        assert!(matches!(active.claim("p_1", "s"), Err(DaemonError::Busy(k)) if k == key));
        assert!(active.claim("p2", "s").is_ok());
        assert_eq!(active.len(), 2);

        active.release(&key);
        assert!(active.claim("p_1", "s").is_ok());
    }
}
