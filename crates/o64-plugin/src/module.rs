//! Capability module contract
//!
//! Every module implements the common lifecycle trait plus the extension
//! trait of its capability category. The registry stores modules as
//! [`ModuleTable`] variants so the category is carried in the type and the
//! capability-specific operations stay reachable without downcasting.

use std::fmt;

use bitflags::bitflags;
use o64_core::{Capability, SessionHandle};

/// Identity a module reports through its entry table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub capability: Capability,
    /// Capability API version the module was built against, packed 0x00MMmmpp
    pub api_version: u32,
    /// Module's own release version, same packing
    pub module_version: u32,
    pub name: String,
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} module)", self.name, self.capability)
    }
}

/// Lifecycle contract shared by all capability categories.
///
/// Operations return a plain message on failure; the registry wraps it with
/// the capability and phase before it reaches a caller.
pub trait CapabilityModule: Send {
    /// Identity self-report; expected to be stable for the module's lifetime
    fn descriptor(&self) -> ModuleDescriptor;

    /// Called once when the slot starts; the handle stays valid until shutdown
    fn startup(&mut self, session: SessionHandle) -> Result<(), String>;

    /// Called once when the slot stops
    fn shutdown(&mut self) -> Result<(), String>;

    /// Media becomes visible to the module at run entry
    fn media_open(&mut self) -> Result<(), String>;

    /// Run exit; called in reverse hook order
    fn media_close(&mut self) -> Result<(), String>;
}

/// Signal-processor module operations
pub trait RspModule: CapabilityModule {
    /// Execute the queued task list
    fn run_task(&mut self) -> Result<(), String>;
}

/// Graphics module operations
pub trait GraphicsModule: CapabilityModule {
    /// Present one frame
    fn update_frame(&mut self) -> Result<(), String>;

    /// Read back the requested buffer as tightly packed RGB rows
    fn read_frame(&mut self, buffer: FrameBuffer) -> Result<FrameCapture, String>;
}

/// Audio module operations
pub trait AudioModule: CapabilityModule {
    /// Output level 0..=100; muted overrides the level without losing it
    fn set_volume(&mut self, volume: u8, muted: bool) -> Result<(), String>;
}

/// Input module operations
pub trait InputModule: CapabilityModule {
    fn key_down(&mut self, event: KeyEvent) -> Result<(), String>;

    fn key_up(&mut self, event: KeyEvent) -> Result<(), String>;
}

/// Execution module operations
pub trait ExecutionModule: CapabilityModule {
    /// Advance emulation by one frame
    fn run_frame(&mut self) -> Result<(), String>;

    fn reset(&mut self, kind: ResetKind) -> Result<(), String>;
}

/// A hooked module, stored under its category so capability-specific
/// operations dispatch without downcasting
pub enum ModuleTable {
    Rsp(Box<dyn RspModule>),
    Graphics(Box<dyn GraphicsModule>),
    Audio(Box<dyn AudioModule>),
    Input(Box<dyn InputModule>),
    Execution(Box<dyn ExecutionModule>),
}

impl ModuleTable {
    /// Category encoded in the table shape
    pub fn capability(&self) -> Capability {
        match self {
            Self::Rsp(_) => Capability::Rsp,
            Self::Graphics(_) => Capability::Graphics,
            Self::Audio(_) => Capability::Audio,
            Self::Input(_) => Capability::Input,
            Self::Execution(_) => Capability::Execution,
        }
    }

    pub fn descriptor(&self) -> ModuleDescriptor {
        match self {
            Self::Rsp(module) => module.descriptor(),
            Self::Graphics(module) => module.descriptor(),
            Self::Audio(module) => module.descriptor(),
            Self::Input(module) => module.descriptor(),
            Self::Execution(module) => module.descriptor(),
        }
    }

    pub fn startup(&mut self, session: SessionHandle) -> Result<(), String> {
        match self {
            Self::Rsp(module) => module.startup(session),
            Self::Graphics(module) => module.startup(session),
            Self::Audio(module) => module.startup(session),
            Self::Input(module) => module.startup(session),
            Self::Execution(module) => module.startup(session),
        }
    }

    pub fn shutdown(&mut self) -> Result<(), String> {
        match self {
            Self::Rsp(module) => module.shutdown(),
            Self::Graphics(module) => module.shutdown(),
            Self::Audio(module) => module.shutdown(),
            Self::Input(module) => module.shutdown(),
            Self::Execution(module) => module.shutdown(),
        }
    }

    pub fn media_open(&mut self) -> Result<(), String> {
        match self {
            Self::Rsp(module) => module.media_open(),
            Self::Graphics(module) => module.media_open(),
            Self::Audio(module) => module.media_open(),
            Self::Input(module) => module.media_open(),
            Self::Execution(module) => module.media_open(),
        }
    }

    pub fn media_close(&mut self) -> Result<(), String> {
        match self {
            Self::Rsp(module) => module.media_close(),
            Self::Graphics(module) => module.media_close(),
            Self::Audio(module) => module.media_close(),
            Self::Input(module) => module.media_close(),
            Self::Execution(module) => module.media_close(),
        }
    }

    pub fn as_rsp_mut(&mut self) -> Option<&mut dyn RspModule> {
        match self {
            Self::Rsp(module) => Some(module.as_mut()),
            _ => None,
        }
    }

    pub fn as_graphics_mut(&mut self) -> Option<&mut dyn GraphicsModule> {
        match self {
            Self::Graphics(module) => Some(module.as_mut()),
            _ => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut dyn AudioModule> {
        match self {
            Self::Audio(module) => Some(module.as_mut()),
            _ => None,
        }
    }

    pub fn as_input_mut(&mut self) -> Option<&mut dyn InputModule> {
        match self {
            Self::Input(module) => Some(module.as_mut()),
            _ => None,
        }
    }

    pub fn as_execution_mut(&mut self) -> Option<&mut dyn ExecutionModule> {
        match self {
            Self::Execution(module) => Some(module.as_mut()),
            _ => None,
        }
    }
}

bitflags! {
    /// Modifier mask carried in the high half of a packed key event.
    /// Bit layout follows the SDL key-modifier convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifiers: u16 {
        const LSHIFT = 0x0001;
        const RSHIFT = 0x0002;
        const LCTRL = 0x0040;
        const RCTRL = 0x0080;
        const LALT = 0x0100;
        const RALT = 0x0200;
        const LMETA = 0x0400;
        const RMETA = 0x0800;
        const NUM = 0x1000;
        const CAPS = 0x2000;
        const MODE = 0x4000;
    }
}

/// Keyboard event forwarded to the input module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub sym: u16,
    pub modifiers: KeyModifiers,
}

impl KeyEvent {
    /// Unpack the wire form: key symbol in the low half, modifiers above it
    pub fn from_raw(raw: u32) -> Self {
        Self {
            sym: (raw & 0xffff) as u16,
            modifiers: KeyModifiers::from_bits_retain((raw >> 16) as u16),
        }
    }

    pub fn to_raw(self) -> u32 {
        u32::from(self.sym) | (u32::from(self.modifiers.bits()) << 16)
    }
}

/// Which buffer a framebuffer read targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBuffer {
    Front,
    Back,
}

impl FrameBuffer {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Front),
            1 => Some(Self::Back),
            _ => None,
        }
    }
}

/// Reset depth requested of the execution module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Soft,
    Hard,
}

impl ResetKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Soft),
            1 => Some(Self::Hard),
            _ => None,
        }
    }
}

/// Pixels handed back by a graphics module read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCapture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}
