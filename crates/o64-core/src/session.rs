//! Shared session state machine and run signals
//!
//! One `SessionContext` exists per host instance. The dispatcher mutates it
//! from the session-owner thread; other threads may query state and flip the
//! stop signal, nothing else. Capability modules receive a handle at startup
//! and communicate through it rather than calling back into the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::SessionConfig;
use crate::error::{HostError, Result};

/// Coarse view of the session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No media open
    Idle,
    /// ROM or disk open, not running
    MediaOpen,
    Running,
    /// Nested under Running
    Paused,
}

/// The session record the dispatcher consults before every command
#[derive(Debug, Clone)]
pub struct SessionState {
    rom_open: bool,
    disk_open: bool,
    running: bool,
    paused: bool,
    save_slot: u8,
    speed_factor: u32,
    speed_limited: bool,
    volume: u8,
    muted: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            rom_open: false,
            disk_open: false,
            running: false,
            paused: false,
            save_slot: 0,
            speed_factor: 100,
            speed_limited: true,
            volume: 80,
            muted: false,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial record from configured session defaults.
    /// Out-of-range configured values keep the built-in defaults.
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut state = Self::default();
        if let Err(err) = state.set_save_slot(config.save_slot) {
            tracing::warn!("ignoring configured save slot: {err}");
        }
        if let Err(err) = state.set_speed_factor(config.speed_factor) {
            tracing::warn!("ignoring configured speed factor: {err}");
        }
        if let Err(err) = state.set_volume(config.volume) {
            tracing::warn!("ignoring configured volume: {err}");
        }
        state.speed_limited = config.speed_limited;
        state
    }

    pub fn rom_open(&self) -> bool {
        self.rom_open
    }

    pub fn disk_open(&self) -> bool {
        self.disk_open
    }

    pub fn media_open(&self) -> bool {
        self.rom_open || self.disk_open
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn save_slot(&self) -> u8 {
        self.save_slot
    }

    pub fn speed_factor(&self) -> u32 {
        self.speed_factor
    }

    pub fn speed_limited(&self) -> bool {
        self.speed_limited
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn run_state(&self) -> RunState {
        if self.running {
            if self.paused {
                RunState::Paused
            } else {
                RunState::Running
            }
        } else if self.media_open() {
            RunState::MediaOpen
        } else {
            RunState::Idle
        }
    }

    // Transitions. Each enforces the record's invariants: rom and disk are
    // mutually exclusive, running implies media open, paused implies running.

    pub fn open_rom(&mut self) -> Result<()> {
        if self.running {
            return Err(HostError::invalid_state("cannot open media while running"));
        }
        if self.rom_open {
            return Err(HostError::invalid_state("a ROM image is already open"));
        }
        if self.disk_open {
            return Err(HostError::invalid_state("a disk image is already open"));
        }
        self.rom_open = true;
        Ok(())
    }

    pub fn open_disk(&mut self) -> Result<()> {
        if self.running {
            return Err(HostError::invalid_state("cannot open media while running"));
        }
        if self.rom_open {
            return Err(HostError::invalid_state("a ROM image is already open"));
        }
        if self.disk_open {
            return Err(HostError::invalid_state("a disk image is already open"));
        }
        self.disk_open = true;
        Ok(())
    }

    pub fn close_rom(&mut self) -> Result<()> {
        if self.running {
            return Err(HostError::invalid_state("cannot close media while running"));
        }
        if !self.rom_open {
            return Err(HostError::invalid_state("no ROM image is open"));
        }
        self.rom_open = false;
        Ok(())
    }

    pub fn close_disk(&mut self) -> Result<()> {
        if self.running {
            return Err(HostError::invalid_state("cannot close media while running"));
        }
        if !self.disk_open {
            return Err(HostError::invalid_state("no disk image is open"));
        }
        self.disk_open = false;
        Ok(())
    }

    pub fn begin_run(&mut self) -> Result<()> {
        if self.running {
            return Err(HostError::invalid_state("session is already running"));
        }
        if !self.media_open() {
            return Err(HostError::invalid_state("no media open"));
        }
        self.running = true;
        self.paused = false;
        Ok(())
    }

    /// Run loop exit; a no-op when not running
    pub fn end_run(&mut self) {
        self.running = false;
        self.paused = false;
    }

    pub fn pause(&mut self) -> Result<()> {
        if !self.running {
            return Err(HostError::invalid_state("session is not running"));
        }
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.running {
            return Err(HostError::invalid_state("session is not running"));
        }
        self.paused = false;
        Ok(())
    }

    pub fn set_save_slot(&mut self, slot: u8) -> Result<()> {
        if slot > 9 {
            return Err(HostError::invalid_argument(format!(
                "save slot {slot} outside 0..=9"
            )));
        }
        self.save_slot = slot;
        Ok(())
    }

    pub fn set_speed_factor(&mut self, factor: u32) -> Result<()> {
        if !(1..=1000).contains(&factor) {
            return Err(HostError::invalid_argument(format!(
                "speed factor {factor} outside 1..=1000"
            )));
        }
        self.speed_factor = factor;
        Ok(())
    }

    pub fn set_speed_limited(&mut self, limited: bool) {
        self.speed_limited = limited;
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<()> {
        if volume > 100 {
            return Err(HostError::invalid_argument(format!(
                "volume {volume} outside 0..=100"
            )));
        }
        self.volume = volume;
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }
}

/// Cooperative run signals, observed by the run loop at a bounded interval.
///
/// Stores are Release and loads Acquire, so a flip made on one thread is
/// visible to the run thread on its next poll.
#[derive(Debug, Default)]
pub struct RunSignals {
    stop: AtomicBool,
    step: AtomicBool,
}

impl RunSignals {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Single-step request consumed by the run loop while paused
    pub fn request_step(&self) {
        self.step.store(true, Ordering::Release);
    }

    pub fn take_step(&self) -> bool {
        self.step.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.stop.store(false, Ordering::Release);
        self.step.store(false, Ordering::Release);
    }
}

/// Shared session context: the state record plus the run signals
#[derive(Debug, Default)]
pub struct SessionContext {
    state: RwLock<SessionState>,
    signals: RunSignals,
}

/// Clonable handle shared with the run loop and capability modules
pub type SessionHandle = Arc<SessionContext>;

impl SessionContext {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: RwLock::new(state),
            signals: RunSignals::default(),
        }
    }

    pub fn state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write()
    }

    pub fn signals(&self) -> &RunSignals {
        &self.signals
    }

    pub fn run_state(&self) -> RunState {
        self.state.read().run_state()
    }

    /// Deliverable from any thread; the run loop observes it on its next poll
    pub fn request_stop(&self) {
        self.signals.request_stop();
    }
}
