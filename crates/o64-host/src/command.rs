//! The typed command surface a front end drives the host with
//!
//! Every request is one `Command` value; the dispatcher in `host` validates
//! and executes it, answering with a `CommandReply`. Commands borrow their
//! bulk payloads so a front end never hands over ownership of an image just
//! to have it validated.

use std::path::{Path, PathBuf};

use o64_core::RunState;
use o64_plugin::FrameCapture;

use crate::media::{CheatCode, TitleSettings};

/// Callback invoked at every frame boundary with the frame index
pub type FrameCallback = Box<dyn FnMut(u64) + Send>;

/// Supplies media the host cannot locate on its own
pub trait MediaLoader: Send {
    /// Path of the disk image to open next, if one is queued
    fn disk_image_path(&mut self) -> Option<PathBuf> {
        None
    }
}

/// One request to the dispatcher
pub enum Command<'a> {
    RomOpen { image: &'a [u8] },
    RomClose,
    DiskOpen,
    DiskClose,
    BootImageOpen { image: &'a [u8] },
    /// Leading bytes of the open media's header, capped at `max_len`
    GetHeader { max_len: usize },
    GetTitleSettings,
    SetTitleSettings { settings: TitleSettings },
    /// Enter the run loop; blocks until the session stops
    Execute,
    Stop,
    Pause,
    Resume,
    QueryState { field: StateField },
    SetState { field: StateField, value: u32 },
    /// `None` targets the current slot
    SaveState { slot: Option<u8> },
    LoadState { slot: Option<u8> },
    SaveStateTo { path: &'a Path, format: u32 },
    LoadStateFrom { path: &'a Path },
    SetSaveSlot { slot: u8 },
    /// Packed key event: symbol in the low half, modifiers above it
    KeyDown { raw: u32 },
    KeyUp { raw: u32 },
    /// Arm a capture for the next frame boundary
    RequestCapture,
    ReadFrame { buffer: u32 },
    Reset { kind: u32 },
    /// Run one frame, then hold the session paused
    AdvanceFrame,
    SetFrameCallback { callback: Option<FrameCallback> },
    SetMediaLoader { loader: Option<Box<dyn MediaLoader>> },
    AddCheat { name: &'a str, codes: &'a [CheatCode] },
    SetCheatEnabled { name: &'a str, enabled: bool },
    NetplayInit { host: &'a str, port: u16 },
    NetplayRegisterPlayer { player: u32, registration_id: u32 },
    NetplayVersionCheck { api_version: u32 },
    NetplayClose,
}

/// Dispatcher answer for a completed command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandReply {
    Done,
    Header(Vec<u8>),
    TitleSettings(TitleSettings),
    StateValue(u32),
    Frame(FrameCapture),
    NetplayVersion(u32),
}

/// Session fields exposed through `QueryState` and `SetState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    EmuState,
    SaveSlot,
    SpeedFactor,
    SpeedLimiter,
    AudioVolume,
    AudioMute,
}

/// Wire encoding of the session lifecycle for state queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuState {
    Stopped = 1,
    Running = 2,
    Paused = 3,
}

impl EmuState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Stopped),
            2 => Some(Self::Running),
            3 => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_run_state(state: RunState) -> Self {
        match state {
            RunState::Idle | RunState::MediaOpen => Self::Stopped,
            RunState::Running => Self::Running,
            RunState::Paused => Self::Paused,
        }
    }
}
