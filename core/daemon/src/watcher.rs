//! Per-playback state machine that issues the one-time corrective seek.
//!
//! ```text
//! Idle --start (< START_WINDOW)--> Armed --tick (>= WAIT_TIME)--> Fixed
//! Idle --start (>= START_WINDOW)--> Suppressed
//! any  --stop / end--> Idle
//! ```
//!
//! Host failures never escape this module: they are logged and the phase is
//! left as it was, so an armed watcher retries on the next tick.

use std::time::Duration;
use subresync_mpv_protocol::PlaybackEvent;
use tracing::{debug, error, info};

use crate::host::{HostError, PlayerHost, SettingsSource};

pub const WAIT_TIME_SECS: f64 = 5.0;
pub const SEEK_BACK_SECS: f64 = 1.0;
pub const START_WINDOW_SECS: f64 = 2.0;
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Timings {
    wait_secs: f64,
    seek_back_secs: f64,
    start_window_secs: f64,
}

const FIXED_TIMINGS: Timings = Timings {
    wait_secs: WAIT_TIME_SECS,
    seek_back_secs: SEEK_BACK_SECS,
    start_window_secs: START_WINDOW_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No qualifying playback in progress.
    #[default]
    Idle,
    /// Playback began near zero; waiting for the position to pass the wait time.
    Armed,
    /// Corrective action issued for this session.
    Fixed,
    /// Playback began mid-stream; nothing to do until the next start.
    Suppressed,
}

impl SessionPhase {
    pub fn playback_active(self) -> bool {
        matches!(self, SessionPhase::Armed | SessionPhase::Fixed)
    }

    pub fn fix_applied(self) -> bool {
        matches!(self, SessionPhase::Fixed | SessionPhase::Suppressed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Seek { from: f64, to: f64 },
    StepBack { from: f64 },
}

/// What a single poll tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Disabled,
    Inactive,
    NotPlaying,
    Waiting { position: f64 },
    Applied(Correction),
    Failed,
}

pub struct PlaybackWatcher<H, S> {
    host: H,
    settings: S,
    phase: SessionPhase,
    timings: Timings,
}

impl<H: PlayerHost, S: SettingsSource> PlaybackWatcher<H, S> {
    pub fn new(host: H, settings: S) -> Self {
        Self {
            host,
            settings,
            phase: SessionPhase::Idle,
            timings: FIXED_TIMINGS,
        }
    }

    #[cfg(test)]
    fn with_timings(host: H, settings: S, timings: Timings) -> Self {
        Self {
            timings,
            ..Self::new(host, settings)
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn handle(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => self.on_playback_started(),
            PlaybackEvent::Stopped => self.on_playback_stopped(),
            PlaybackEvent::Ended => self.on_playback_ended(),
        }
    }

    pub fn on_playback_started(&mut self) {
        if !self.settings.enabled() {
            return;
        }

        let position = match self.host.time() {
            Ok(position) => position,
            Err(err) => {
                error!(error = %err, "Failed to read position at playback start");
                return;
            }
        };

        if position < self.timings.start_window_secs {
            self.phase = SessionPhase::Armed;
            info!(
                position,
                wait_secs = self.timings.wait_secs,
                "Playback started; subtitle fix armed"
            );
        } else {
            self.phase = SessionPhase::Suppressed;
            info!(position, "Playback resumed mid-stream; subtitle fix skipped");
        }
    }

    pub fn on_playback_stopped(&mut self) {
        self.phase = SessionPhase::Idle;
        debug!("Playback stopped");
    }

    pub fn on_playback_ended(&mut self) {
        self.phase = SessionPhase::Idle;
        debug!("Playback ended");
    }

    pub fn check_and_apply_fix(&mut self) -> TickOutcome {
        if !self.settings.enabled() {
            return TickOutcome::Disabled;
        }
        if self.phase != SessionPhase::Armed {
            return TickOutcome::Inactive;
        }

        match self.try_apply_fix() {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Failed to apply subtitle fix");
                TickOutcome::Failed
            }
        }
    }

    fn try_apply_fix(&mut self) -> Result<TickOutcome, HostError> {
        if !self.host.is_playing()? {
            return Ok(TickOutcome::NotPlaying);
        }

        let position = self.host.time()?;
        if position < self.timings.wait_secs {
            return Ok(TickOutcome::Waiting { position });
        }

        info!(
            position,
            seek_back_secs = self.timings.seek_back_secs,
            "Playback reached wait time; seeking back to trigger subtitle re-sync"
        );

        let target = position - self.timings.seek_back_secs;
        let correction = if target >= 0.0 {
            self.host.seek_time(target)?;
            info!(target, "Seeked back for subtitle re-sync");
            Correction::Seek {
                from: position,
                to: target,
            }
        } else {
            self.host.step_back()?;
            info!("Used step back to trigger subtitle re-sync");
            Correction::StepBack { from: position }
        };

        self.phase = SessionPhase::Fixed;
        Ok(TickOutcome::Applied(correction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Seek(f64),
        StepBack,
    }

    #[derive(Debug)]
    struct FakePlayer {
        position: f64,
        playing: bool,
        fail_time: bool,
        fail_seek: bool,
        calls: Vec<Call>,
    }

    #[derive(Clone)]
    struct FakeHost {
        player: Arc<Mutex<FakePlayer>>,
    }

    impl FakeHost {
        fn at(position: f64) -> Self {
            Self {
                player: Arc::new(Mutex::new(FakePlayer {
                    position,
                    playing: true,
                    fail_time: false,
                    fail_seek: false,
                    calls: Vec::new(),
                })),
            }
        }

        fn set_position(&self, position: f64) {
            self.player.lock().expect("lock player").position = position;
        }

        fn set_playing(&self, playing: bool) {
            self.player.lock().expect("lock player").playing = playing;
        }

        fn set_fail_time(&self, fail: bool) {
            self.player.lock().expect("lock player").fail_time = fail;
        }

        fn set_fail_seek(&self, fail: bool) {
            self.player.lock().expect("lock player").fail_seek = fail;
        }

        fn calls(&self) -> Vec<Call> {
            self.player.lock().expect("lock player").calls.clone()
        }
    }

    fn player_error(command: &str) -> HostError {
        HostError::Player {
            command: command.to_string(),
            error: "error running command".to_string(),
        }
    }

    impl PlayerHost for FakeHost {
        fn is_playing(&self) -> Result<bool, HostError> {
            Ok(self.player.lock().expect("lock player").playing)
        }

        fn time(&self) -> Result<f64, HostError> {
            let player = self.player.lock().expect("lock player");
            if player.fail_time {
                return Err(player_error("get_property"));
            }
            Ok(player.position)
        }

        fn seek_time(&self, seconds: f64) -> Result<(), HostError> {
            let mut player = self.player.lock().expect("lock player");
            if player.fail_seek {
                return Err(player_error("seek"));
            }
            player.calls.push(Call::Seek(seconds));
            Ok(())
        }

        fn step_back(&self) -> Result<(), HostError> {
            let mut player = self.player.lock().expect("lock player");
            if player.fail_seek {
                return Err(player_error("frame-back-step"));
            }
            player.calls.push(Call::StepBack);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FakeSettings {
        enabled: Arc<AtomicBool>,
    }

    impl FakeSettings {
        fn new(enabled: bool) -> Self {
            Self {
                enabled: Arc::new(AtomicBool::new(enabled)),
            }
        }

        fn set(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    impl SettingsSource for FakeSettings {
        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    fn watcher_at(
        position: f64,
        enabled: bool,
    ) -> (PlaybackWatcher<FakeHost, FakeSettings>, FakeHost, FakeSettings) {
        let host = FakeHost::at(position);
        let settings = FakeSettings::new(enabled);
        let watcher = PlaybackWatcher::new(host.clone(), settings.clone());
        (watcher, host, settings)
    }

    fn assert_seek(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected seek to {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn start_from_beginning_seeks_back_once() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Armed);

        host.set_position(5.2);
        let outcome = watcher.check_and_apply_fix();
        let TickOutcome::Applied(Correction::Seek { from, to }) = outcome else {
            panic!("expected seek, got {:?}", outcome);
        };
        assert_seek(from, 5.2);
        assert_seek(to, 4.2);
        assert_eq!(watcher.phase(), SessionPhase::Fixed);

        host.set_position(6.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Inactive);
        host.set_position(7.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Inactive);

        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let Call::Seek(target) = calls[0] else {
            panic!("expected seek call, got {:?}", calls[0]);
        };
        assert_seek(target, 4.2);
    }

    #[test]
    fn start_mid_stream_never_seeks() {
        let (mut watcher, host, _settings) = watcher_at(3.0, true);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Suppressed);
        assert!(!watcher.phase().playback_active());
        assert!(watcher.phase().fix_applied());

        host.set_position(6.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Inactive);
        host.set_position(60.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Inactive);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn waits_until_position_reaches_wait_time() {
        let (mut watcher, host, _settings) = watcher_at(0.5, true);
        watcher.on_playback_started();

        host.set_position(0.3);
        assert_eq!(
            watcher.check_and_apply_fix(),
            TickOutcome::Waiting { position: 0.3 }
        );
        assert!(host.calls().is_empty());

        host.set_position(5.0);
        assert!(matches!(
            watcher.check_and_apply_fix(),
            TickOutcome::Applied(Correction::Seek { .. })
        ));
        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let Call::Seek(target) = calls[0] else {
            panic!("expected seek call, got {:?}", calls[0]);
        };
        assert_seek(target, 4.0);
    }

    #[test]
    fn disabled_feature_takes_no_action() {
        let (mut watcher, host, _settings) = watcher_at(0.0, false);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Idle);

        host.set_position(10.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Disabled);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn disabling_mid_session_suppresses_until_reenabled() {
        let (mut watcher, host, settings) = watcher_at(0.0, true);
        watcher.on_playback_started();

        settings.set(false);
        host.set_position(6.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Disabled);
        assert!(host.calls().is_empty());
        assert_eq!(watcher.phase(), SessionPhase::Armed);

        settings.set(true);
        assert!(matches!(
            watcher.check_and_apply_fix(),
            TickOutcome::Applied(_)
        ));
        assert_eq!(host.calls().len(), 1);
    }

    #[test]
    fn stop_and_end_reset_for_a_fresh_cycle() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        watcher.on_playback_started();
        host.set_position(5.5);
        watcher.check_and_apply_fix();
        assert_eq!(watcher.phase(), SessionPhase::Fixed);

        watcher.handle(PlaybackEvent::Ended);
        assert_eq!(watcher.phase(), SessionPhase::Idle);
        assert!(!watcher.phase().playback_active());
        assert!(!watcher.phase().fix_applied());

        host.set_position(0.0);
        watcher.handle(PlaybackEvent::Started);
        host.set_position(5.5);
        watcher.check_and_apply_fix();
        assert_eq!(host.calls().len(), 2);

        watcher.handle(PlaybackEvent::Stopped);
        assert_eq!(watcher.phase(), SessionPhase::Idle);
    }

    #[test]
    fn stop_before_fix_disarms() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        watcher.on_playback_started();
        watcher.on_playback_stopped();

        host.set_position(8.0);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Inactive);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn failed_seek_keeps_watcher_armed_and_retries() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        watcher.on_playback_started();
        host.set_position(5.1);
        host.set_fail_seek(true);

        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Failed);
        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::Failed);
        assert_eq!(watcher.phase(), SessionPhase::Armed);

        host.set_fail_seek(false);
        host.set_position(5.3);
        assert!(matches!(
            watcher.check_and_apply_fix(),
            TickOutcome::Applied(_)
        ));
        assert_eq!(host.calls().len(), 1);
    }

    #[test]
    fn failed_position_query_at_start_leaves_state_unchanged() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        host.set_fail_time(true);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Idle);

        host.set_fail_time(false);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Armed);

        host.set_fail_time(true);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Armed);
    }

    #[test]
    fn paused_or_idle_player_is_not_corrected() {
        let (mut watcher, host, _settings) = watcher_at(0.0, true);
        watcher.on_playback_started();
        host.set_playing(false);
        host.set_position(9.0);

        assert_eq!(watcher.check_and_apply_fix(), TickOutcome::NotPlaying);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn negative_target_falls_back_to_step_back() {
        let host = FakeHost::at(0.0);
        let settings = FakeSettings::new(true);
        let timings = Timings {
            wait_secs: 0.5,
            seek_back_secs: 1.0,
            start_window_secs: 2.0,
        };
        let mut watcher = PlaybackWatcher::with_timings(host.clone(), settings, timings);
        watcher.on_playback_started();

        host.set_position(0.6);
        assert!(matches!(
            watcher.check_and_apply_fix(),
            TickOutcome::Applied(Correction::StepBack { .. })
        ));
        assert_eq!(host.calls(), vec![Call::StepBack]);
        assert_eq!(watcher.phase(), SessionPhase::Fixed);
    }

    #[test]
    fn start_window_boundary_suppresses() {
        let (mut watcher, _host, _settings) = watcher_at(START_WINDOW_SECS, true);
        watcher.on_playback_started();
        assert_eq!(watcher.phase(), SessionPhase::Suppressed);
    }
}
