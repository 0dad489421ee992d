//! Listener-side reconciliation of local playback against the admin's
//! server-stamped snapshots.
//!
//! The reconciler is a two-state machine. In `Idle` a snapshot is turned into
//! at most one transport command. Issuing a command moves it to `Correcting`
//! for the damping window; snapshots arriving meanwhile are remembered (only
//! the latest) and applied by [`SyncReconciler::poll`] once the window is over.

use std::time::Duration;

use shared::protocol::{MemberId, PlaybackSnapshot};

pub const DEFAULT_DAMPING: Duration = Duration::from_millis(100);

/// Drift below this is left alone.
pub const POSITION_TOLERANCE_SECONDS: f64 = 0.5;

pub trait PlaybackTransport {
    fn position_seconds(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn seek(&mut self, position_seconds: f64);
    fn play(&mut self);
    fn pause(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    None,
    /// Held back until the damping window closes.
    Deferred,
    Seek(f64),
    SeekAndPlay(f64),
    PauseAndSeek(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Correcting { until_ms: i64 },
}

pub struct SyncReconciler {
    self_id: MemberId,
    damping_ms: i64,
    state: ReconcilerState,
    pending: Option<PlaybackSnapshot>,
    latest: Option<PlaybackSnapshot>,
}

impl SyncReconciler {
    pub fn new(self_id: MemberId, damping: Duration) -> Self {
        Self {
            self_id,
            damping_ms: damping.as_millis() as i64,
            state: ReconcilerState::Idle,
            pending: None,
            latest: None,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn latest(&self) -> Option<&PlaybackSnapshot> {
        self.latest.as_ref()
    }

    /// `local_receipt_ms` must be on the server's clock (see `ServerClock`).
    pub fn on_snapshot<T: PlaybackTransport>(
        &mut self,
        snapshot: PlaybackSnapshot,
        local_receipt_ms: i64,
        transport: &mut T,
    ) -> Correction {
        if snapshot.emitted_by == self.self_id {
            return Correction::None;
        }

        self.latest = Some(snapshot.clone());
        self.expire_window(local_receipt_ms);

        if let ReconcilerState::Correcting { .. } = self.state {
            self.pending = Some(snapshot);
            return Correction::Deferred;
        }

        self.apply(&snapshot, local_receipt_ms, transport)
    }

    /// Applies a deferred snapshot once the damping window has elapsed.
    pub fn poll<T: PlaybackTransport>(&mut self, now_ms: i64, transport: &mut T) -> Correction {
        self.expire_window(now_ms);

        if self.state != ReconcilerState::Idle {
            return Correction::None;
        }

        match self.pending.take() {
            Some(snapshot) => self.apply(&snapshot, now_ms, transport),
            None => Correction::None,
        }
    }

    pub fn reset(&mut self) {
        self.state = ReconcilerState::Idle;
        self.pending = None;
        self.latest = None;
    }

    fn expire_window(&mut self, now_ms: i64) {
        if let ReconcilerState::Correcting { until_ms } = self.state {
            if now_ms >= until_ms {
                self.state = ReconcilerState::Idle;
            }
        }
    }

    fn apply<T: PlaybackTransport>(
        &mut self,
        snapshot: &PlaybackSnapshot,
        now_ms: i64,
        transport: &mut T,
    ) -> Correction {
        let correction = plan_correction(
            snapshot,
            now_ms,
            transport.position_seconds(),
            transport.is_playing(),
        );

        if correction == Correction::None {
            return correction;
        }

        self.state = ReconcilerState::Correcting {
            until_ms: now_ms + self.damping_ms,
        };

        match correction {
            Correction::SeekAndPlay(target) => {
                transport.seek(target);
                transport.play();
            }
            Correction::PauseAndSeek(target) => {
                transport.pause();
                transport.seek(target);
            }
            Correction::Seek(target) => transport.seek(target),
            Correction::None | Correction::Deferred => {}
        }

        correction
    }
}

/// Where the admin's transport should be at `now_ms`.
pub fn target_position(snapshot: &PlaybackSnapshot, now_ms: i64) -> f64 {
    if !snapshot.is_playing {
        return snapshot.position_seconds;
    }

    // Negative delay means clock skew; never extrapolate backwards.
    let network_delay_ms = (now_ms - snapshot.emitted_at_server_time).max(0);

    snapshot.position_seconds + network_delay_ms as f64 / 1000.0
}

pub fn plan_correction(
    snapshot: &PlaybackSnapshot,
    now_ms: i64,
    local_position: f64,
    local_playing: bool,
) -> Correction {
    let target = target_position(snapshot, now_ms);

    if snapshot.is_playing && !local_playing {
        Correction::SeekAndPlay(target)
    } else if !snapshot.is_playing && local_playing {
        Correction::PauseAndSeek(target)
    } else if (local_position - target).abs() > POSITION_TOLERANCE_SECONDS {
        Correction::Seek(target)
    } else {
        Correction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Seek(f64),
        Play,
        Pause,
    }

    /// Transport whose clock is driven by the test.
    #[derive(Default)]
    struct FakeTransport {
        position: f64,
        playing: bool,
        commands: Vec<Command>,
    }

    impl FakeTransport {
        fn advance(&mut self, ms: i64) {
            if self.playing {
                self.position += ms as f64 / 1000.0;
            }
        }
    }

    impl PlaybackTransport for FakeTransport {
        fn position_seconds(&self) -> f64 {
            self.position
        }

        fn is_playing(&self) -> bool {
            self.playing
        }

        fn seek(&mut self, position_seconds: f64) {
            self.position = position_seconds;
            self.commands.push(Command::Seek(position_seconds));
        }

        fn play(&mut self) {
            self.playing = true;
            self.commands.push(Command::Play);
        }

        fn pause(&mut self) {
            self.playing = false;
            self.commands.push(Command::Pause);
        }
    }

    const T: i64 = 1_000_000;

    fn snapshot(position_seconds: f64, is_playing: bool, emitted_at: i64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            position_seconds,
            is_playing,
            emitted_at_server_time: emitted_at,
            source_url: None,
            source_name: None,
            emitted_by: MemberId::from("admin"),
        }
    }

    fn reconciler() -> SyncReconciler {
        SyncReconciler::new(MemberId::from("listener"), DEFAULT_DAMPING)
    }

    #[test]
    fn paused_listener_catches_up_with_latency_compensation() {
        let mut reconciler = reconciler();
        let mut transport = FakeTransport::default();

        let correction = reconciler.on_snapshot(snapshot(10.0, true, T), T + 300, &mut transport);

        let Correction::SeekAndPlay(target) = correction else {
            panic!("expected seek and play, got {:?}", correction);
        };
        assert!((target - 10.3).abs() <= 0.05);
        assert!(transport.playing);
        assert!((transport.position - 10.3).abs() <= 0.05);
        assert_eq!(transport.commands.len(), 2);
        assert!(matches!(
            reconciler.state(),
            ReconcilerState::Correcting { .. }
        ));
    }

    #[test]
    fn converged_listener_issues_no_further_commands() {
        let mut reconciler = reconciler();
        let mut transport = FakeTransport::default();
        reconciler.on_snapshot(snapshot(10.0, true, T), T + 300, &mut transport);
        let issued = transport.commands.len();

        // One second later the admin reports 11.0s; we are at ~11.3 + small drift.
        transport.advance(1_000);
        let correction = reconciler.on_snapshot(snapshot(11.2, true, T + 1_000), T + 1_300, &mut transport);

        assert_eq!(correction, Correction::None);
        assert_eq!(transport.commands.len(), issued);
        assert_eq!(reconciler.state(), ReconcilerState::Idle);
    }

    #[test]
    fn playing_listener_pauses_at_admin_position() {
        let mut reconciler = reconciler();
        let mut transport = FakeTransport {
            position: 42.0,
            playing: true,
            ..Default::default()
        };

        let correction = reconciler.on_snapshot(snapshot(40.0, false, T), T + 250, &mut transport);

        assert_eq!(correction, Correction::PauseAndSeek(40.0));
        assert_eq!(
            transport.commands,
            vec![Command::Pause, Command::Seek(40.0)]
        );
    }

    #[test]
    fn drift_beyond_tolerance_seeks_without_transition() {
        let mut reconciler = reconciler();
        let mut transport = FakeTransport {
            position: 20.0,
            playing: true,
            ..Default::default()
        };

        let correction = reconciler.on_snapshot(snapshot(21.0, true, T), T, &mut transport);

        assert_eq!(correction, Correction::Seek(21.0));
        assert_eq!(transport.commands, vec![Command::Seek(21.0)]);
    }

    #[test]
    fn paused_snapshot_is_not_extrapolated() {
        assert_eq!(target_position(&snapshot(5.0, false, T), T + 2_000), 5.0);
    }

    #[test]
    fn clock_skew_never_rewinds_target() {
        assert_eq!(target_position(&snapshot(5.0, true, T), T - 400), 5.0);
    }

    #[test]
    fn own_snapshots_are_ignored() {
        let mut reconciler = SyncReconciler::new(MemberId::from("admin"), DEFAULT_DAMPING);
        let mut transport = FakeTransport::default();

        let correction = reconciler.on_snapshot(snapshot(10.0, true, T), T, &mut transport);

        assert_eq!(correction, Correction::None);
        assert!(transport.commands.is_empty());
        assert!(reconciler.latest().is_none());
    }

    #[test]
    fn burst_of_snapshots_does_not_storm_the_transport() {
        let mut reconciler = reconciler();
        let mut transport = FakeTransport::default();

        reconciler.on_snapshot(snapshot(10.0, true, T), T, &mut transport);
        assert_eq!(transport.commands.len(), 2);

        // Admin seeks around rapidly inside the damping window.
        for (i, position) in [30.0, 50.0, 70.0].into_iter().enumerate() {
            let at = T + 10 * (i as i64 + 1);
            let correction =
                reconciler.on_snapshot(snapshot(position, true, at), at, &mut transport);
            assert_eq!(correction, Correction::Deferred);
        }
        assert_eq!(transport.commands.len(), 2);

        // Still inside the window: nothing happens.
        transport.advance(50);
        assert_eq!(reconciler.poll(T + 50, &mut transport), Correction::None);

        // Window over: only the latest snapshot is applied, extrapolated to now.
        transport.advance(70);
        let correction = reconciler.poll(T + 120, &mut transport);
        let Correction::Seek(target) = correction else {
            panic!("expected seek, got {:?}", correction);
        };
        assert!((target - 70.09).abs() < 1e-9);
        assert_eq!(transport.commands.len(), 3);

        // Converged: further polls and in-tolerance snapshots are quiet.
        transport.advance(200);
        assert_eq!(reconciler.poll(T + 320, &mut transport), Correction::None);
        assert_eq!(
            reconciler.on_snapshot(snapshot(70.3, true, T + 320), T + 320, &mut transport),
            Correction::None
        );
        assert_eq!(transport.commands.len(), 3);
    }

    #[test]
    fn window_expires_before_next_snapshot() {
        let mut reconciler = SyncReconciler::new(
            MemberId::from("listener"),
            Duration::from_millis(100),
        );
        let mut transport = FakeTransport::default();

        reconciler.on_snapshot(snapshot(1.0, true, T), T, &mut transport);
        let correction = reconciler.on_snapshot(snapshot(1.0, false, T + 150), T + 150, &mut transport);

        assert_eq!(correction, Correction::PauseAndSeek(1.0));
    }
}
