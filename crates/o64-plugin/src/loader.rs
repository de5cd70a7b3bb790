//! Module image loading
//!
//! The production loader wraps `libloading`. Everything above it only sees
//! the [`ModuleLoader`] trait, so registry behavior can be exercised with an
//! in-memory loader in tests.
//!
//! A native module image exports one symbol, [`MODULE_ENTRY_SYMBOL`], with
//! the [`ModuleEntryFn`] signature. The entry point builds the module behind
//! `Box::new` and leaks it through `Box::into_raw`; the host reclaims
//! ownership with `Box::from_raw` and keeps the image mapped for as long as
//! the module lives.

use std::fs;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use thiserror::Error;

use crate::module::{ModuleDescriptor, ModuleTable};

/// Symbol every native module image exports
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"o64_module_entry";

/// Entry signature: hands the host an owned module table
pub type ModuleEntryFn = unsafe extern "C" fn() -> *mut ModuleTable;

/// Image extensions accepted during discovery
pub const MODULE_EXTENSIONS: [&str; 3] = ["so", "dylib", "dll"];

/// Loader-level failure; the registry wraps it with slot context
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot open module image: {0}")]
    Open(String),
    #[error("Module image does not export the entry symbol: {0}")]
    MissingEntry(String),
    #[error("Module entry point returned no table")]
    NullTable,
}

/// A mapped module image. Dropping it unmaps the library, so it must outlive
/// every pointer resolved from it.
pub struct ModuleImage {
    path: PathBuf,
    _library: Library,
}

impl ModuleImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A module table together with the image it was resolved from.
///
/// Field order is load-bearing: the table drops before the image backing its
/// code, on every exit path.
pub struct LoadedModule {
    table: ModuleTable,
    descriptor: ModuleDescriptor,
    image: Option<ModuleImage>,
}

impl LoadedModule {
    /// In-process module with no backing image
    pub fn new(table: ModuleTable) -> Self {
        let descriptor = table.descriptor();
        Self {
            table,
            descriptor,
            image: None,
        }
    }

    pub fn with_image(table: ModuleTable, image: ModuleImage) -> Self {
        let descriptor = table.descriptor();
        Self {
            table,
            descriptor,
            image: Some(image),
        }
    }

    /// Identity captured when the module was loaded
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn table(&self) -> &ModuleTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ModuleTable {
        &mut self.table
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image.as_ref().map(ModuleImage::path)
    }
}

/// Platform abstraction over module image loading and discovery
pub trait ModuleLoader: Send {
    /// Load one image and take ownership of its module table
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError>;

    /// Candidate image paths under a directory, recursive, sorted
    fn candidates(&self, directory: &Path) -> Vec<PathBuf>;
}

/// `libloading`-backed loader used outside tests
#[derive(Debug, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        tracing::debug!("Loading module image {}", path.display());

        // SAFETY: mapping an image runs its initializers. Module images are
        // executed with the same trust as the host binary itself.
        let library =
            unsafe { Library::new(path) }.map_err(|err| LoadError::Open(err.to_string()))?;

        let raw = {
            // SAFETY: the entry contract fixes this exact signature for the
            // exported symbol.
            let entry: Symbol<ModuleEntryFn> = unsafe { library.get(MODULE_ENTRY_SYMBOL) }
                .map_err(|err| LoadError::MissingEntry(err.to_string()))?;
            // SAFETY: the entry point allocates the table with Box::new and
            // transfers ownership through the raw pointer.
            unsafe { entry() }
        };
        if raw.is_null() {
            return Err(LoadError::NullTable);
        }
        // SAFETY: non-null per the check above and uniquely owned per the
        // entry contract.
        let table = *unsafe { Box::from_raw(raw) };

        Ok(LoadedModule::with_image(
            table,
            ModuleImage {
                path: path.to_path_buf(),
                _library: library,
            },
        ))
    }

    fn candidates(&self, directory: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_images(directory, &mut found);
        found.sort();
        found
    }
}

/// Check if a path looks like a loadable module image
pub fn is_module_image(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            MODULE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

fn collect_images(directory: &Path, found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("Skipping module directory {}: {err}", directory.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_images(&path, found);
        } else if is_module_image(&path) {
            found.push(path);
        }
    }
}
