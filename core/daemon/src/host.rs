//! Contract between the watcher and the media player it drives.
//!
//! The watcher never talks to mpv directly; it only sees these traits so the
//! state machine can be exercised against in-memory fakes.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("player connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("player connection closed")]
    Disconnected,

    #[error("player did not answer `{command}` within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("player rejected `{command}`: {error}")]
    Player { command: String, error: String },

    #[error("unexpected reply to `{command}`: {detail}")]
    UnexpectedReply { command: String, detail: String },
}

/// Queries and commands the watcher needs from the player.
pub trait PlayerHost {
    fn is_playing(&self) -> Result<bool, HostError>;

    /// Current playback position in seconds.
    fn time(&self) -> Result<f64, HostError>;

    /// Absolute seek to `seconds`.
    fn seek_time(&self, seconds: f64) -> Result<(), HostError>;

    /// Player-native small rewind, used when an absolute target would be negative.
    fn step_back(&self) -> Result<(), HostError>;
}

/// Live view of the user's on/off switch. Implementations must not cache:
/// the value is consulted on every guarded entry point.
pub trait SettingsSource {
    fn enabled(&self) -> bool;
}

impl<S: SettingsSource + ?Sized> SettingsSource for &S {
    fn enabled(&self) -> bool {
        (**self).enabled()
    }
}
