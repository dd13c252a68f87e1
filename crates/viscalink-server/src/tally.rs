//! Tally translation: NDI source states in, camera VISCA commands out.
//!
//! Ingress writes every received tally state into the [`TallyTable`]
//! (last write wins). A periodic tick reconciles the table against each
//! mapped camera's last applied state and dispatches the configured command
//! bytes for transitions. Polling instead of reacting per-frame is the
//! debounce: sources flap during switcher transitions, and the tick caps
//! the command rate per camera at one per interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use viscalink_core::config::NdiMapping;
use viscalink_core::TallyState;

use crate::camera::{CameraCommand, CameraHandle};

// ── State table ───────────────────────────────────────────────────────────────

/// Authoritative cache of the latest state received per NDI source.
///
/// Timestamps are not consulted for ordering: the gateway is not a clock
/// authority, so a late frame overwrites like any other.
#[derive(Default)]
pub struct TallyTable {
    states: Mutex<HashMap<String, TallyState>>,
}

impl TallyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, source: &str, state: TallyState) {
        let mut states = self.states.lock().unwrap();
        states.insert(source.to_owned(), state);
    }

    pub fn get(&self, source: &str) -> Option<TallyState> {
        self.states.lock().unwrap().get(source).copied()
    }
}

// ── Translation ───────────────────────────────────────────────────────────────

/// Command bytes for a transition into `state`, or `None` when the
/// transition is suppressed (state disabled, no bytes configured, or an
/// unknown wire value).
///
/// Program+Preview reuses the program sequence unless the mapping carries a
/// distinct one.
pub fn resolve_command(mapping: &NdiMapping, state: TallyState) -> Option<Bytes> {
    let bytes = match state {
        TallyState::Program => {
            if !mapping.tally_program_enabled {
                return None;
            }
            mapping.commands.program.clone()
        }
        TallyState::ProgramPreview => {
            if !mapping.tally_program_enabled {
                return None;
            }
            mapping
                .commands
                .program_preview
                .clone()
                .unwrap_or_else(|| mapping.commands.program.clone())
        }
        TallyState::Preview => {
            if !mapping.tally_preview_enabled {
                return None;
            }
            mapping.commands.preview.clone()
        }
        TallyState::Off => mapping.commands.off.clone(),
        TallyState::Unknown(_) => return None,
    };
    if bytes.is_empty() {
        return None;
    }
    Some(Bytes::from(bytes))
}

// ── Ticker ────────────────────────────────────────────────────────────────────

/// Reconciles the tally table against camera state on a fixed period.
///
/// `inflight` remembers what was handed to each camera's queue but not yet
/// applied, so a slow camera is not flooded with duplicate transitions while
/// its worker catches up.
pub struct TallyTicker {
    table: Arc<TallyTable>,
    cameras: Arc<HashMap<u8, CameraHandle>>,
    inflight: HashMap<u8, TallyState>,
}

impl TallyTicker {
    pub fn new(table: Arc<TallyTable>, cameras: Arc<HashMap<u8, CameraHandle>>) -> Self {
        Self {
            table,
            cameras,
            inflight: HashMap::new(),
        }
    }

    /// One reconciliation pass over all mapped cameras.
    ///
    /// Suppressed transitions advance the camera's state directly so they
    /// are not retried every tick; dispatch failures (camera down, queue
    /// full) are left for the next pass.
    pub fn reconcile(&mut self) {
        for camera in self.cameras.values() {
            let Some(mapping) = &camera.mapping else {
                continue;
            };
            if mapping.source_name.is_empty() {
                continue;
            }
            let Some(state) = self.table.get(&mapping.source_name) else {
                continue;
            };
            if state == camera.current_tally() {
                self.inflight.remove(&camera.id);
                continue;
            }
            if self.inflight.get(&camera.id) == Some(&state) {
                continue;
            }
            match resolve_command(mapping, state) {
                Some(command) => {
                    match camera.dispatch(CameraCommand::Tally { state, command }) {
                        Ok(()) => {
                            self.inflight.insert(camera.id, state);
                        }
                        Err(e) => {
                            debug!(camera = %camera.name, error = %e, "tally transition deferred")
                        }
                    }
                }
                None => {
                    camera.advance_tally(state);
                    self.inflight.remove(&camera.id);
                    debug!(camera = %camera.name, %state, "tally command suppressed");
                }
            }
        }
    }

    /// Tick until shutdown.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => if *shutdown.borrow() { break },
            }
            self.reconcile();
        }
        debug!("tally ticker stopped");
    }
}
