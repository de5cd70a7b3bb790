//! o64-plugin: capability module contract, loading, and registry
//!
//! A capability module is an interchangeable native unit filling one of the
//! five capability categories. This crate defines the trait contract those
//! modules implement, the loader that maps their images, and the registry
//! that owns the five slots and enforces hook/start/stop/unhook rules.

pub mod loader;
pub mod module;
pub mod registry;

pub use loader::{
    is_module_image, LoadError, LoadedModule, ModuleEntryFn, ModuleImage, ModuleLoader,
    NativeLoader, MODULE_ENTRY_SYMBOL, MODULE_EXTENSIONS,
};
pub use module::{
    AudioModule, CapabilityModule, ExecutionModule, FrameBuffer, FrameCapture, GraphicsModule,
    InputModule, KeyEvent, KeyModifiers, ModuleDescriptor, ModuleTable, ResetKind, RspModule,
};
pub use registry::{ModuleListing, PluginRegistry};
