//! Capability categories for interchangeable emulation modules

use std::fmt;

use crate::version;

/// The five functional roles a loaded module can fulfill.
///
/// The ordinal value doubles as the registry slot index, so the order here
/// is part of the contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Rsp,
    Graphics,
    Audio,
    Input,
    Execution,
}

impl Capability {
    /// Fixed number of capability categories
    pub const COUNT: usize = 5;

    /// All categories in slot order
    pub const ALL: [Capability; Capability::COUNT] = [
        Capability::Rsp,
        Capability::Graphics,
        Capability::Audio,
        Capability::Input,
        Capability::Execution,
    ];

    /// Registry slot index for this category
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Capability> {
        Capability::ALL.get(index).copied()
    }

    /// Human-readable category name
    pub fn name(self) -> &'static str {
        match self {
            Capability::Rsp => "RSP",
            Capability::Graphics => "Graphics",
            Capability::Audio => "Audio",
            Capability::Input => "Input",
            Capability::Execution => "Execution",
        }
    }

    /// Directory name under the module search root where images of this
    /// category live when configured by bare file name.
    pub fn dir_name(self) -> &'static str {
        match self {
            Capability::Rsp => "rsp",
            Capability::Graphics => "graphics",
            Capability::Audio => "audio",
            Capability::Input => "input",
            Capability::Execution => "execution",
        }
    }

    /// Capability API version the host was built against
    pub fn expected_api_version(self) -> u32 {
        match self {
            Capability::Rsp => version::RSP_API_VERSION,
            Capability::Graphics => version::GFX_API_VERSION,
            Capability::Audio => version::AUDIO_API_VERSION,
            Capability::Input => version::INPUT_API_VERSION,
            Capability::Execution => version::EXECUTION_API_VERSION,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
