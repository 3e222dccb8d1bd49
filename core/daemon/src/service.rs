//! The driving loop: one consumer thread owns the watcher and serializes
//! lifecycle events, poll ticks and shutdown through a single channel.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use subresync_mpv_protocol::PlaybackEvent;
use tracing::{debug, info, trace, warn};

use crate::backoff::ReconnectBackoff;
use crate::host::{PlayerHost, SettingsSource};
use crate::mpv::MpvHost;
use crate::watcher::{Correction, PlaybackWatcher, TickOutcome, POLL_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMessage {
    Lifecycle(PlaybackEvent),
    /// The player connection is gone (mpv quit or the socket closed).
    PlayerGone,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    PlayerGone,
}

/// Drives one watcher until the player goes away or shutdown is requested.
///
/// Ticks fire every [`POLL_INTERVAL`] regardless of how many events arrive in
/// between.
pub fn run_session<H, S>(
    watcher: &mut PlaybackWatcher<H, S>,
    messages: &Receiver<ServiceMessage>,
) -> SessionEnd
where
    H: PlayerHost,
    S: SettingsSource,
{
    let mut next_tick = Instant::now() + POLL_INTERVAL;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match messages.recv_timeout(wait) {
            Ok(ServiceMessage::Lifecycle(event)) => {
                watcher.handle(event);
                let phase = watcher.phase();
                debug!(
                    ?event,
                    playback_active = phase.playback_active(),
                    fix_applied = phase.fix_applied(),
                    "Lifecycle event handled"
                );
            }
            Ok(ServiceMessage::PlayerGone) => return SessionEnd::PlayerGone,
            Ok(ServiceMessage::Shutdown) => return SessionEnd::Shutdown,
            Err(RecvTimeoutError::Timeout) => {
                match watcher.check_and_apply_fix() {
                    TickOutcome::Applied(Correction::Seek { from, to }) => {
                        debug!(from, to, "Corrective seek issued");
                    }
                    TickOutcome::Applied(Correction::StepBack { from }) => {
                        debug!(from, "Corrective step back issued");
                    }
                    TickOutcome::Waiting { position } => {
                        trace!(position, "Waiting for playback to reach wait time");
                    }
                    _ => {}
                }
                next_tick += POLL_INTERVAL;
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now + POLL_INTERVAL;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return SessionEnd::Shutdown,
        }
    }
}

/// Waits out a reconnect delay. Returns `false` when shutdown was requested.
///
/// Stale `PlayerGone` and lifecycle messages from a closed connection are
/// dropped here.
fn wait_for_retry(messages: &Receiver<ServiceMessage>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match messages.recv_timeout(wait) {
            Ok(ServiceMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => return true,
        }
    }
}

pub struct ServiceOptions {
    pub socket_path: PathBuf,
}

/// Connect, watch, reconnect, until shutdown.
pub fn run<S>(
    options: &ServiceOptions,
    settings: &S,
    sender: Sender<ServiceMessage>,
    messages: Receiver<ServiceMessage>,
) where
    S: SettingsSource,
{
    info!(socket = %options.socket_path.display(), "Service starting");
    let mut backoff = ReconnectBackoff::new();

    loop {
        let host = match MpvHost::connect(&options.socket_path, sender.clone()) {
            Ok(host) => host,
            Err(err) => {
                let delay = backoff.next_delay();
                // Only the first failure in a row is worth a warning; mpv is
                // usually just not running yet.
                if backoff.failures() == 1 {
                    warn!(
                        error = %err,
                        socket = %options.socket_path.display(),
                        "mpv socket unavailable; waiting for player"
                    );
                } else {
                    debug!(error = %err, retry_in = ?delay, "mpv socket still unavailable");
                }
                if wait_for_retry(&messages, delay) {
                    continue;
                }
                break;
            }
        };

        backoff.reset();
        info!(socket = %options.socket_path.display(), "Connected to mpv");

        let mut watcher = PlaybackWatcher::new(host, settings);
        match run_session(&mut watcher, &messages) {
            SessionEnd::Shutdown => break,
            SessionEnd::PlayerGone => {
                info!("mpv connection closed; waiting for player");
                if !wait_for_retry(&messages, backoff.next_delay()) {
                    break;
                }
            }
        }
    }

    info!("Service stopped");
}
