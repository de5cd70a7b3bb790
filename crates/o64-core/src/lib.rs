//! o64-core: foundation types for the oxide64 emulation host
//!
//! This crate carries the pieces every other layer builds on: the error
//! taxonomy, the capability categories, the host configuration file, the
//! settings overlay resolver and the shared session state machine.

pub mod capability;
pub mod config;
pub mod error;
pub mod overlay;
pub mod session;
pub mod version;

pub use capability::Capability;
pub use config::{Config, TitleSelector};
pub use error::{HostError, ModulePhase, Result};
pub use overlay::{ConfigResolver, ModuleChoice, OverlayResolver, SettingsOverlay, NO_MODULE};
pub use session::{RunSignals, RunState, SessionContext, SessionHandle, SessionState};
