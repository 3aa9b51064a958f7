//! Per-session timer pair: the round clock and the wall-shift schedule
//!
//! Arming spawns two interval tasks that post [`TimerEvent`]s back to the
//! server loop; the session itself is only ever touched from that loop.
//! Every arming bumps an epoch carried by the events, so ticks already queued
//! from an earlier arming are recognised as stale and ignored.

use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Clock,
    WallShift,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub lobby_id: String,
    pub kind: TimerKind,
    pub epoch: u64,
}

pub type TimerSender = mpsc::UnboundedSender<TimerEvent>;

#[derive(Debug, Default)]
pub struct SessionTimers {
    epoch: u64,
    armed: bool,
    handles: Vec<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any running timers with a fresh pair and returns the new epoch.
    /// Without a sender the pair is tracked as armed but nothing is spawned,
    /// which lets the caller drive ticks by hand.
    pub fn arm(
        &mut self,
        lobby_id: &str,
        sender: Option<&TimerSender>,
        clock_period: Duration,
        wall_shift_period: Duration,
    ) -> u64 {
        self.disarm();
        self.epoch += 1;
        self.armed = true;

        if let Some(sender) = sender {
            self.handles.push(spawn_ticker(
                lobby_id.to_string(),
                TimerKind::Clock,
                self.epoch,
                clock_period,
                sender.clone(),
            ));
            self.handles.push(spawn_ticker(
                lobby_id.to_string(),
                TimerKind::WallShift,
                self.epoch,
                wall_shift_period,
                sender.clone(),
            ));
        }

        debug!("Armed timers for lobby {} (epoch {})", lobby_id, self.epoch);
        self.epoch
    }

    /// Stops both timers. Safe to call any number of times.
    pub fn disarm(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a tick stamped with `epoch` belongs to the current arming
    pub fn accepts(&self, epoch: u64) -> bool {
        self.armed && epoch == self.epoch
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn spawn_ticker(
    lobby_id: String,
    kind: TimerKind,
    epoch: u64,
    period: Duration,
    sender: TimerSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let event = TimerEvent {
                lobby_id: lobby_id.clone(),
                kind,
                epoch,
            };
            if sender.send(event).is_err() {
                break;
            }
        }
    })
}
