//! o64-host: the command surface of the oxide64 emulation host
//!
//! Front ends drive emulation through one `Host` value: media images go in,
//! capability modules are bound from configuration, and a blocking run loop
//! paces frames until a stop request arrives. Everything here layers over
//! the session state machine from o64-core and the module registry from
//! o64-plugin.

pub mod command;
pub mod host;
pub mod media;
pub mod netplay;
pub mod runner;
pub mod savestate;

pub use command::{Command, CommandReply, EmuState, FrameCallback, MediaLoader, StateField};
pub use host::Host;
pub use media::{
    image_digest, validate_boot_image, validate_disk_image, validate_rom_image, Cheat, CheatCode,
    MediaHeader, MediaKind, MediaStore, SaveKind, TitleSettings, TitleTable, BOOT_IMAGE_MAX,
    BOOT_IMAGE_MIN, HEADER_LEN, ROM_IMAGE_MAX, ROM_IMAGE_MIN,
};
pub use netplay::{Netplay, NETPLAY_PLAYERS};
pub use runner::{run_loop, BASE_FRAME_PERIOD};
pub use savestate::{
    read_state, slot_path, write_state, StateSnapshot, MAX_STATE_FORMAT, NATIVE_STATE_FORMAT,
};
