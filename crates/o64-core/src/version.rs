//! API version constants and compatibility checks
//!
//! Versions are packed as 0x00MMmmpp (major, minor, patch). Compatibility
//! across the control API and the per-capability module APIs is decided on
//! the major component alone.

/// Version of the front-end-facing control API (the command surface)
pub const CONTROL_API_VERSION: u32 = 0x02_05_00;

/// Capability API versions the host expects modules to be built against
pub const RSP_API_VERSION: u32 = 0x02_00_00;
pub const GFX_API_VERSION: u32 = 0x02_02_00;
pub const AUDIO_API_VERSION: u32 = 0x02_00_00;
pub const INPUT_API_VERSION: u32 = 0x02_01_01;
pub const EXECUTION_API_VERSION: u32 = 0x02_00_00;

/// Netplay local surface versions
pub const NETPLAY_API_VERSION: u32 = 0x01_00_00;
pub const NETPLAY_CORE_VERSION: u32 = 0x01_00_00;

/// Major component of a packed version
pub const fn major(version: u32) -> u32 {
    version >> 16
}

/// True when two packed versions share a major component
pub const fn same_major(a: u32, b: u32) -> bool {
    (a & 0xffff_0000) == (b & 0xffff_0000)
}

/// Render a packed version as "major.minor.patch"
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xffff,
        (version >> 8) & 0xff,
        version & 0xff
    )
}
