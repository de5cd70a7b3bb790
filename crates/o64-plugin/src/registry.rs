//! Module slot registry
//!
//! Owns the five capability slots and every hooked module image. All slot
//! mutation funnels through here so the two registry invariants hold on
//! every path: a slot is empty or hooked (and only then possibly started),
//! and a hooked module's reported category equals the slot category.

use std::path::{Path, PathBuf};

use o64_core::{
    Capability, HostError, ModuleChoice, ModulePhase, Result, SessionHandle, SettingsOverlay,
    version, NO_MODULE,
};

use crate::loader::{LoadedModule, ModuleLoader};
use crate::module::{
    AudioModule, ExecutionModule, GraphicsModule, InputModule, ModuleDescriptor, RspModule,
};

/// One discovered module, or the synthetic no-module entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleListing {
    pub name: String,
    pub capability: Option<Capability>,
    pub path: Option<PathBuf>,
}

impl ModuleListing {
    /// The entry callers use to leave a slot empty
    pub fn none() -> Self {
        Self {
            name: NO_MODULE.to_string(),
            capability: None,
            path: None,
        }
    }
}

#[derive(Default)]
struct ModuleSlot {
    module: Option<LoadedModule>,
    started: bool,
    /// Choice most recently applied to this slot; None until an overlay
    /// binds it or after a manual unhook
    binding: Option<ModuleChoice>,
}

/// Registry of capability module slots, one per category
pub struct PluginRegistry {
    slots: [ModuleSlot; Capability::COUNT],
    loader: Box<dyn ModuleLoader>,
}

impl PluginRegistry {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        Self {
            slots: std::array::from_fn(|_| ModuleSlot::default()),
            loader,
        }
    }

    pub fn is_hooked(&self, capability: Capability) -> bool {
        self.slots[capability.index()].module.is_some()
    }

    pub fn is_started(&self, capability: Capability) -> bool {
        self.slots[capability.index()].started
    }

    /// Identity recorded when the slot's module was hooked
    pub fn descriptor(&self, capability: Capability) -> Option<&ModuleDescriptor> {
        self.slots[capability.index()]
            .module
            .as_ref()
            .map(LoadedModule::descriptor)
    }

    /// True when every slot the host requires is hooked. Execution is
    /// exempt: the host falls back to built-in pacing when it is empty.
    pub fn all_ready(&self) -> bool {
        Capability::ALL
            .iter()
            .filter(|capability| **capability != Capability::Execution)
            .all(|capability| self.is_hooked(*capability))
    }

    /// Bind a loaded module to its slot. The module must report the slot's
    /// category; on any rejection it is dropped and its image released.
    pub fn hook(&mut self, capability: Capability, module: LoadedModule) -> Result<()> {
        let reported = module.descriptor().capability;
        if reported != capability {
            return Err(HostError::TypeMismatch {
                slot: capability,
                reported,
            });
        }
        let shape = module.table().capability();
        if shape != capability {
            return Err(HostError::TypeMismatch {
                slot: capability,
                reported: shape,
            });
        }
        let slot = &mut self.slots[capability.index()];
        if slot.module.is_some() {
            return Err(HostError::AlreadyHooked(capability));
        }
        tracing::info!(
            "Hooked {capability} module '{}' {}",
            module.descriptor().name,
            version::format_version(module.descriptor().module_version),
        );
        slot.module = Some(module);
        Ok(())
    }

    /// Load an image from disk and hook it in one step
    pub fn load_and_hook(&mut self, capability: Capability, path: &Path) -> Result<()> {
        if self.is_hooked(capability) {
            return Err(HostError::AlreadyHooked(capability));
        }
        let loaded = self.load_image(capability, path)?;
        self.hook(capability, loaded)
    }

    /// Release a slot and its image. A no-op on an empty slot; rejected on a
    /// started slot, which must be stopped first.
    pub fn unhook(&mut self, capability: Capability) -> Result<()> {
        if self.slots[capability.index()].started {
            return Err(HostError::invalid_state(format!(
                "{capability} slot is started; stop it before unhooking"
            )));
        }
        self.clear_slot(capability);
        Ok(())
    }

    /// Start a hooked slot. On failure the slot stays hooked but not
    /// started, so the caller can inspect or unhook it explicitly.
    pub fn start(&mut self, capability: Capability, session: &SessionHandle) -> Result<()> {
        let slot = &mut self.slots[capability.index()];
        if slot.started {
            return Err(HostError::invalid_state(format!(
                "{capability} slot is already started"
            )));
        }
        let Some(module) = slot.module.as_mut() else {
            return Err(HostError::invalid_state(format!(
                "{capability} slot is not hooked"
            )));
        };

        let recorded = module.descriptor().clone();
        let current = module.table().descriptor();
        if current != recorded {
            return Err(HostError::Incompatible(format!(
                "{capability} module identity drifted after hook: recorded '{}' API {}, now '{}' API {}",
                recorded.name,
                version::format_version(recorded.api_version),
                current.name,
                version::format_version(current.api_version),
            )));
        }
        let expected = capability.expected_api_version();
        if !version::same_major(recorded.api_version, expected) {
            tracing::warn!(
                "{capability} module '{}' built against API {} but host expects {}",
                recorded.name,
                version::format_version(recorded.api_version),
                version::format_version(expected),
            );
        }

        module
            .table_mut()
            .startup(session.clone())
            .map_err(|reason| {
                HostError::module_failure(capability, ModulePhase::Startup, reason)
            })?;
        slot.started = true;
        tracing::info!("Started {capability} module '{}'", recorded.name);
        Ok(())
    }

    /// Stop a started slot. The slot is marked not-started even when the
    /// module's shutdown entry fails, so teardown can always proceed.
    pub fn stop(&mut self, capability: Capability) -> Result<()> {
        let slot = &mut self.slots[capability.index()];
        if !slot.started {
            return Err(HostError::invalid_state(format!(
                "{capability} slot is not started"
            )));
        }
        slot.started = false;
        if let Some(module) = slot.module.as_mut() {
            module.table_mut().shutdown().map_err(|reason| {
                HostError::module_failure(capability, ModulePhase::Shutdown, reason)
            })?;
        }
        tracing::info!("Stopped {capability} module");
        Ok(())
    }

    /// Reconcile the slots with a resolved overlay, in slot order.
    ///
    /// Unchanged choices are skipped without touching the slot. A changed
    /// choice stops and unhooks the old module, then loads, hooks and starts
    /// the new one. The first failure aborts the remaining categories;
    /// slots already updated keep their new state, and a failed start
    /// unhooks the fresh module and clears the recorded binding so the next
    /// apply retries the load.
    pub fn apply_settings(
        &mut self,
        overlay: &SettingsOverlay,
        session: &SessionHandle,
    ) -> Result<()> {
        for capability in Capability::ALL {
            let choice = overlay.get(capability);
            if self.slots[capability.index()].binding.as_ref() == Some(choice) {
                tracing::debug!("{capability} module choice unchanged");
                continue;
            }
            if self.slots[capability.index()].started {
                self.stop(capability)?;
            }
            self.unhook(capability)?;
            match choice {
                ModuleChoice::NoModule => {
                    tracing::info!("{capability} slot left empty");
                    self.slots[capability.index()].binding = Some(ModuleChoice::NoModule);
                }
                ModuleChoice::Path(path) => {
                    let loaded = self.load_image(capability, path)?;
                    self.hook(capability, loaded)?;
                    if let Err(err) = self.start(capability, session) {
                        self.clear_slot(capability);
                        return Err(err);
                    }
                    self.slots[capability.index()].binding = Some(choice.clone());
                }
            }
        }
        Ok(())
    }

    /// Discover module images under a directory. Each candidate is loaded
    /// only long enough to read its identity; nothing stays hooked. Invalid
    /// images are skipped. The synthetic no-module entry comes first and the
    /// rest are sorted by display name.
    pub fn enumerate(&self, directory: &Path) -> Vec<ModuleListing> {
        let mut modules = Vec::new();
        for path in self.loader.candidates(directory) {
            match self.loader.load(&path) {
                Ok(loaded) => {
                    let descriptor = loaded.descriptor();
                    if descriptor.capability != loaded.table().capability() {
                        tracing::debug!(
                            "Skipping module candidate {}: table shape disagrees with reported category",
                            path.display(),
                        );
                        continue;
                    }
                    modules.push(ModuleListing {
                        name: descriptor.name.clone(),
                        capability: Some(descriptor.capability),
                        path: Some(path),
                    });
                }
                Err(err) => {
                    tracing::debug!("Skipping module candidate {}: {err}", path.display());
                }
            }
        }
        modules.sort_by(|a, b| a.name.cmp(&b.name));

        let mut listings = Vec::with_capacity(modules.len() + 1);
        listings.push(ModuleListing::none());
        listings.extend(modules);
        listings
    }

    /// Stop and unhook every slot, best effort. Safe to call twice.
    pub fn shutdown_all(&mut self) {
        for capability in Capability::ALL.iter().rev().copied() {
            let slot = &mut self.slots[capability.index()];
            if slot.started {
                slot.started = false;
                if let Some(module) = slot.module.as_mut() {
                    if let Err(reason) = module.table_mut().shutdown() {
                        tracing::warn!("{capability} module failed during shutdown: {reason}");
                    }
                }
            }
            self.clear_slot(capability);
        }
    }

    /// Announce media to every started module, in slot order. On failure the
    /// modules already notified are closed again in reverse order.
    pub fn media_open_all(&mut self) -> Result<()> {
        let mut opened: Vec<Capability> = Vec::new();
        for capability in Capability::ALL {
            let slot = &mut self.slots[capability.index()];
            if !slot.started {
                continue;
            }
            let Some(module) = slot.module.as_mut() else {
                continue;
            };
            if let Err(reason) = module.table_mut().media_open() {
                for prev in opened.into_iter().rev() {
                    self.close_media_slot(prev);
                }
                return Err(HostError::module_failure(
                    capability,
                    ModulePhase::MediaOpen,
                    reason,
                ));
            }
            opened.push(capability);
        }
        Ok(())
    }

    /// Withdraw media from every started module, in reverse slot order,
    /// logging failures instead of propagating them
    pub fn media_close_all(&mut self) {
        for capability in Capability::ALL.iter().rev().copied() {
            if self.slots[capability.index()].started {
                self.close_media_slot(capability);
            }
        }
    }

    pub fn rsp_mut(&mut self) -> Option<&mut dyn RspModule> {
        self.slots[Capability::Rsp.index()]
            .module
            .as_mut()
            .and_then(|module| module.table_mut().as_rsp_mut())
    }

    pub fn graphics_mut(&mut self) -> Option<&mut dyn GraphicsModule> {
        self.slots[Capability::Graphics.index()]
            .module
            .as_mut()
            .and_then(|module| module.table_mut().as_graphics_mut())
    }

    pub fn audio_mut(&mut self) -> Option<&mut dyn AudioModule> {
        self.slots[Capability::Audio.index()]
            .module
            .as_mut()
            .and_then(|module| module.table_mut().as_audio_mut())
    }

    pub fn input_mut(&mut self) -> Option<&mut dyn InputModule> {
        self.slots[Capability::Input.index()]
            .module
            .as_mut()
            .and_then(|module| module.table_mut().as_input_mut())
    }

    pub fn execution_mut(&mut self) -> Option<&mut dyn ExecutionModule> {
        self.slots[Capability::Execution.index()]
            .module
            .as_mut()
            .and_then(|module| module.table_mut().as_execution_mut())
    }

    fn load_image(&self, capability: Capability, path: &Path) -> Result<LoadedModule> {
        self.loader
            .load(path)
            .map_err(|err| HostError::LoadFailure {
                what: format!("{capability} module"),
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
    }

    fn clear_slot(&mut self, capability: Capability) {
        let slot = &mut self.slots[capability.index()];
        if let Some(module) = slot.module.take() {
            tracing::debug!(
                "Unhooked {capability} module '{}'",
                module.descriptor().name
            );
        }
        slot.binding = None;
    }

    fn close_media_slot(&mut self, capability: Capability) {
        if let Some(module) = self.slots[capability.index()].module.as_mut() {
            if let Err(reason) = module.table_mut().media_close() {
                tracing::warn!("{capability} module failed during media close: {reason}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::result::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use o64_core::{SessionContext, SessionState};

    use crate::loader::LoadError;
    use crate::module::{
        AudioModule, CapabilityModule, ExecutionModule, FrameBuffer, FrameCapture,
        GraphicsModule, InputModule, KeyEvent, ModuleTable, ResetKind, RspModule,
    };

    #[derive(Default)]
    struct StubCounters {
        startups: AtomicUsize,
        shutdowns: AtomicUsize,
        media_opens: AtomicUsize,
        media_closes: AtomicUsize,
    }

    struct StubModule {
        descriptor: ModuleDescriptor,
        fail_startup: bool,
        fail_shutdown: bool,
        fail_media_open: bool,
        counters: Arc<StubCounters>,
    }

    impl StubModule {
        fn new(capability: Capability, name: &str) -> Self {
            Self {
                descriptor: ModuleDescriptor {
                    capability,
                    api_version: capability.expected_api_version(),
                    module_version: 0x01_00_00,
                    name: name.into(),
                },
                fail_startup: false,
                fail_shutdown: false,
                fail_media_open: false,
                counters: Arc::new(StubCounters::default()),
            }
        }

        fn with_api_version(mut self, api_version: u32) -> Self {
            self.descriptor.api_version = api_version;
            self
        }

        fn failing_startup(mut self) -> Self {
            self.fail_startup = true;
            self
        }

        fn failing_shutdown(mut self) -> Self {
            self.fail_shutdown = true;
            self
        }

        fn failing_media_open(mut self) -> Self {
            self.fail_media_open = true;
            self
        }

        fn counters(&self) -> Arc<StubCounters> {
            Arc::clone(&self.counters)
        }
    }

    impl CapabilityModule for StubModule {
        fn descriptor(&self) -> ModuleDescriptor {
            self.descriptor.clone()
        }

        fn startup(&mut self, _session: SessionHandle) -> Result<(), String> {
            if self.fail_startup {
                return Err("startup refused".into());
            }
            self.counters.startups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), String> {
            if self.fail_shutdown {
                return Err("shutdown refused".into());
            }
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn media_open(&mut self) -> Result<(), String> {
            if self.fail_media_open {
                return Err("media rejected".into());
            }
            self.counters.media_opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn media_close(&mut self) -> Result<(), String> {
            self.counters.media_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl RspModule for StubModule {
        fn run_task(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    impl GraphicsModule for StubModule {
        fn update_frame(&mut self) -> Result<(), String> {
            Ok(())
        }

        fn read_frame(&mut self, _buffer: FrameBuffer) -> Result<FrameCapture, String> {
            Ok(FrameCapture {
                width: 1,
                height: 1,
                pixels: vec![0; 3],
            })
        }
    }

    impl AudioModule for StubModule {
        fn set_volume(&mut self, _volume: u8, _muted: bool) -> Result<(), String> {
            Ok(())
        }
    }

    impl InputModule for StubModule {
        fn key_down(&mut self, _event: KeyEvent) -> Result<(), String> {
            Ok(())
        }

        fn key_up(&mut self, _event: KeyEvent) -> Result<(), String> {
            Ok(())
        }
    }

    impl ExecutionModule for StubModule {
        fn run_frame(&mut self) -> Result<(), String> {
            Ok(())
        }

        fn reset(&mut self, _kind: ResetKind) -> Result<(), String> {
            Ok(())
        }
    }

    /// Reports a different identity on every read after the first
    #[derive(Default)]
    struct DriftModule {
        reads: AtomicUsize,
    }

    impl CapabilityModule for DriftModule {
        fn descriptor(&self) -> ModuleDescriptor {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            ModuleDescriptor {
                capability: Capability::Audio,
                api_version: version::AUDIO_API_VERSION,
                module_version: 0x01_00_00,
                name: if read == 0 {
                    "stable".into()
                } else {
                    "drifted".into()
                },
            }
        }

        fn startup(&mut self, _session: SessionHandle) -> Result<(), String> {
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), String> {
            Ok(())
        }

        fn media_open(&mut self) -> Result<(), String> {
            Ok(())
        }

        fn media_close(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    impl AudioModule for DriftModule {
        fn set_volume(&mut self, _volume: u8, _muted: bool) -> Result<(), String> {
            Ok(())
        }
    }

    type TableFactory = Box<dyn Fn() -> Result<ModuleTable, LoadError> + Send + Sync>;

    struct StubLoader {
        factories: HashMap<PathBuf, TableFactory>,
        loads: Arc<AtomicUsize>,
    }

    impl StubLoader {
        fn new() -> Self {
            Self {
                factories: HashMap::new(),
                loads: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn register<F>(mut self, path: &str, factory: F) -> Self
        where
            F: Fn() -> Result<ModuleTable, LoadError> + Send + Sync + 'static,
        {
            self.factories.insert(PathBuf::from(path), Box::new(factory));
            self
        }

        fn load_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.loads)
        }
    }

    impl ModuleLoader for StubLoader {
        fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match self.factories.get(path) {
                Some(factory) => factory().map(LoadedModule::new),
                None => Err(LoadError::Open(format!(
                    "no stub registered for {}",
                    path.display()
                ))),
            }
        }

        fn candidates(&self, _directory: &Path) -> Vec<PathBuf> {
            let mut paths: Vec<PathBuf> = self.factories.keys().cloned().collect();
            paths.sort();
            paths
        }
    }

    fn table_for(capability: Capability, module: StubModule) -> ModuleTable {
        match capability {
            Capability::Rsp => ModuleTable::Rsp(Box::new(module)),
            Capability::Graphics => ModuleTable::Graphics(Box::new(module)),
            Capability::Audio => ModuleTable::Audio(Box::new(module)),
            Capability::Input => ModuleTable::Input(Box::new(module)),
            Capability::Execution => ModuleTable::Execution(Box::new(module)),
        }
    }

    fn loaded(capability: Capability, name: &str) -> LoadedModule {
        LoadedModule::new(table_for(capability, StubModule::new(capability, name)))
    }

    fn session() -> SessionHandle {
        Arc::new(SessionContext::new(SessionState::new()))
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Box::new(StubLoader::new()))
    }

    #[test]
    fn test_hook_rejects_wrong_category_for_every_slot() {
        for slot_capability in Capability::ALL {
            let other = if slot_capability == Capability::Audio {
                Capability::Graphics
            } else {
                Capability::Audio
            };
            let mut registry = registry();
            let err = registry
                .hook(slot_capability, loaded(other, "imposter"))
                .unwrap_err();
            assert!(
                matches!(err, HostError::TypeMismatch { slot, reported }
                    if slot == slot_capability && reported == other),
                "unexpected error for {slot_capability}: {err}"
            );
            assert!(!registry.is_hooked(slot_capability));
        }
    }

    #[test]
    fn test_hook_rejects_table_shape_mismatch() {
        // Reports Graphics but ships an Audio-shaped table
        let module = LoadedModule::new(ModuleTable::Audio(Box::new(StubModule::new(
            Capability::Graphics,
            "shape-shifter",
        ))));
        let mut registry = registry();
        let err = registry.hook(Capability::Graphics, module).unwrap_err();
        assert!(matches!(
            err,
            HostError::TypeMismatch {
                slot: Capability::Graphics,
                reported: Capability::Audio,
            }
        ));
        assert!(!registry.is_hooked(Capability::Graphics));
    }

    #[test]
    fn test_hook_twice_keeps_existing_binding() {
        let mut registry = registry();
        registry
            .hook(Capability::Audio, loaded(Capability::Audio, "first"))
            .unwrap();
        let err = registry
            .hook(Capability::Audio, loaded(Capability::Audio, "second"))
            .unwrap_err();
        assert!(matches!(err, HostError::AlreadyHooked(Capability::Audio)));
        assert_eq!(registry.descriptor(Capability::Audio).unwrap().name, "first");
    }

    #[test]
    fn test_start_before_hook_is_invalid_state() {
        let mut registry = registry();
        let err = registry.start(Capability::Graphics, &session()).unwrap_err();
        assert!(matches!(err, HostError::InvalidState(_)));
    }

    #[test]
    fn test_start_twice_is_invalid_state() {
        let mut registry = registry();
        let session = session();
        registry
            .hook(Capability::Input, loaded(Capability::Input, "inp"))
            .unwrap();
        registry.start(Capability::Input, &session).unwrap();
        let err = registry.start(Capability::Input, &session).unwrap_err();
        assert!(matches!(err, HostError::InvalidState(_)));
    }

    #[test]
    fn test_start_failure_leaves_slot_hooked_and_unhookable() {
        let mut registry = registry();
        let module = LoadedModule::new(table_for(
            Capability::Audio,
            StubModule::new(Capability::Audio, "aud").failing_startup(),
        ));
        registry.hook(Capability::Audio, module).unwrap();

        let err = registry.start(Capability::Audio, &session()).unwrap_err();
        assert!(matches!(
            err,
            HostError::ModuleFailure {
                capability: Capability::Audio,
                phase: ModulePhase::Startup,
                ..
            }
        ));
        assert!(registry.is_hooked(Capability::Audio));
        assert!(!registry.is_started(Capability::Audio));

        registry.unhook(Capability::Audio).unwrap();
        assert!(!registry.is_hooked(Capability::Audio));
    }

    #[test]
    fn test_unhook_started_slot_is_rejected() {
        let mut registry = registry();
        registry
            .hook(Capability::Graphics, loaded(Capability::Graphics, "gfx"))
            .unwrap();
        registry.start(Capability::Graphics, &session()).unwrap();

        let err = registry.unhook(Capability::Graphics).unwrap_err();
        assert!(matches!(err, HostError::InvalidState(_)));
        assert!(registry.is_hooked(Capability::Graphics));

        registry.stop(Capability::Graphics).unwrap();
        registry.unhook(Capability::Graphics).unwrap();
        assert!(!registry.is_hooked(Capability::Graphics));
    }

    #[test]
    fn test_unhook_empty_slot_is_noop() {
        let mut registry = registry();
        registry.unhook(Capability::Execution).unwrap();
    }

    #[test]
    fn test_stop_requires_started() {
        let mut registry = registry();
        let err = registry.stop(Capability::Audio).unwrap_err();
        assert!(matches!(err, HostError::InvalidState(_)));
    }

    #[test]
    fn test_stop_failure_still_marks_not_started() {
        let mut registry = registry();
        let module = LoadedModule::new(table_for(
            Capability::Audio,
            StubModule::new(Capability::Audio, "aud").failing_shutdown(),
        ));
        registry.hook(Capability::Audio, module).unwrap();
        registry.start(Capability::Audio, &session()).unwrap();

        let err = registry.stop(Capability::Audio).unwrap_err();
        assert!(matches!(
            err,
            HostError::ModuleFailure {
                phase: ModulePhase::Shutdown,
                ..
            }
        ));
        assert!(!registry.is_started(Capability::Audio));
        registry.unhook(Capability::Audio).unwrap();
    }

    #[test]
    fn test_start_tolerates_api_major_drift() {
        let mut registry = registry();
        let module = LoadedModule::new(table_for(
            Capability::Rsp,
            StubModule::new(Capability::Rsp, "old-rsp").with_api_version(0x01_09_07),
        ));
        registry.hook(Capability::Rsp, module).unwrap();
        registry.start(Capability::Rsp, &session()).unwrap();
        assert!(registry.is_started(Capability::Rsp));
    }

    #[test]
    fn test_identity_drift_after_hook_is_incompatible() {
        let mut registry = registry();
        let module = LoadedModule::new(ModuleTable::Audio(Box::new(DriftModule::default())));
        registry.hook(Capability::Audio, module).unwrap();

        let err = registry.start(Capability::Audio, &session()).unwrap_err();
        assert!(matches!(err, HostError::Incompatible(_)));
        assert!(registry.is_hooked(Capability::Audio));
        assert!(!registry.is_started(Capability::Audio));
    }

    #[test]
    fn test_apply_settings_is_idempotent() {
        let loader = StubLoader::new().register("/m/gfx.so", || {
            Ok(table_for(
                Capability::Graphics,
                StubModule::new(Capability::Graphics, "gfx-core"),
            ))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));
        let session = session();

        let mut overlay = SettingsOverlay::new();
        overlay.set(
            Capability::Graphics,
            ModuleChoice::Path(PathBuf::from("/m/gfx.so")),
        );

        registry.apply_settings(&overlay, &session).unwrap();
        assert!(registry.is_started(Capability::Graphics));
        assert!(registry.graphics_mut().is_some());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        registry.apply_settings(&overlay, &session).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_settings_swaps_to_sentinel() {
        let loader = StubLoader::new().register("/m/audio.so", || {
            Ok(table_for(
                Capability::Audio,
                StubModule::new(Capability::Audio, "aud-core"),
            ))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));
        let session = session();

        let mut overlay = SettingsOverlay::new();
        overlay.set(
            Capability::Audio,
            ModuleChoice::Path(PathBuf::from("/m/audio.so")),
        );
        registry.apply_settings(&overlay, &session).unwrap();
        assert!(registry.is_started(Capability::Audio));

        overlay.set(Capability::Audio, ModuleChoice::NoModule);
        registry.apply_settings(&overlay, &session).unwrap();
        assert!(!registry.is_hooked(Capability::Audio));
        assert!(!registry.is_started(Capability::Audio));

        registry.apply_settings(&overlay, &session).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_settings_start_failure_clears_binding_for_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory_attempts = Arc::clone(&attempts);
        let loader = StubLoader::new().register("/m/audio.so", move || {
            let stub = StubModule::new(Capability::Audio, "aud-core");
            let stub = if factory_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                stub.failing_startup()
            } else {
                stub
            };
            Ok(table_for(Capability::Audio, stub))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));
        let session = session();

        let mut overlay = SettingsOverlay::new();
        overlay.set(
            Capability::Audio,
            ModuleChoice::Path(PathBuf::from("/m/audio.so")),
        );

        let err = registry.apply_settings(&overlay, &session).unwrap_err();
        assert!(matches!(
            err,
            HostError::ModuleFailure {
                capability: Capability::Audio,
                ..
            }
        ));
        assert!(!registry.is_hooked(Capability::Audio));

        registry.apply_settings(&overlay, &session).unwrap();
        assert!(registry.is_started(Capability::Audio));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_apply_settings_aborts_on_first_error_keeping_earlier_slots() {
        let loader = StubLoader::new().register("/m/rsp.so", || {
            Ok(table_for(
                Capability::Rsp,
                StubModule::new(Capability::Rsp, "rsp-core"),
            ))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));
        let session = session();

        let mut overlay = SettingsOverlay::new();
        overlay.set(Capability::Rsp, ModuleChoice::Path(PathBuf::from("/m/rsp.so")));
        overlay.set(
            Capability::Graphics,
            ModuleChoice::Path(PathBuf::from("/m/missing.so")),
        );
        overlay.set(
            Capability::Audio,
            ModuleChoice::Path(PathBuf::from("/m/rsp.so")),
        );

        let err = registry.apply_settings(&overlay, &session).unwrap_err();
        assert!(matches!(err, HostError::LoadFailure { .. }));
        assert!(registry.is_started(Capability::Rsp));
        assert!(!registry.is_hooked(Capability::Graphics));
        assert!(!registry.is_hooked(Capability::Audio));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_apply_settings_reloads_after_manual_unhook() {
        let loader = StubLoader::new().register("/m/input.so", || {
            Ok(table_for(
                Capability::Input,
                StubModule::new(Capability::Input, "inp-core"),
            ))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));
        let session = session();

        let mut overlay = SettingsOverlay::new();
        overlay.set(
            Capability::Input,
            ModuleChoice::Path(PathBuf::from("/m/input.so")),
        );
        registry.apply_settings(&overlay, &session).unwrap();

        registry.stop(Capability::Input).unwrap();
        registry.unhook(Capability::Input).unwrap();

        registry.apply_settings(&overlay, &session).unwrap();
        assert!(registry.is_started(Capability::Input));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_all_ready_exempts_execution() {
        let mut registry = registry();
        assert!(!registry.all_ready());
        for capability in [
            Capability::Rsp,
            Capability::Graphics,
            Capability::Audio,
            Capability::Input,
        ] {
            registry
                .hook(capability, loaded(capability, "stub"))
                .unwrap();
        }
        assert!(registry.all_ready());

        registry.unhook(Capability::Audio).unwrap();
        assert!(!registry.all_ready());
    }

    #[test]
    fn test_enumerate_skips_corrupt_images() {
        let loader = StubLoader::new()
            .register("/m/gfx.so", || {
                Ok(table_for(
                    Capability::Graphics,
                    StubModule::new(Capability::Graphics, "gfx-core"),
                ))
            })
            .register("/m/corrupt.so", || Err(LoadError::Open("bad image".into())));
        let registry = PluginRegistry::new(Box::new(loader));

        let listings = registry.enumerate(Path::new("/m"));
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0], ModuleListing::none());
        assert_eq!(listings[1].name, "gfx-core");
        assert_eq!(listings[1].capability, Some(Capability::Graphics));
        assert_eq!(listings[1].path, Some(PathBuf::from("/m/gfx.so")));

        for capability in Capability::ALL {
            assert!(!registry.is_hooked(capability));
        }
    }

    #[test]
    fn test_enumerate_sorts_by_display_name() {
        let loader = StubLoader::new()
            .register("/m/zeta.so", || {
                Ok(table_for(
                    Capability::Graphics,
                    StubModule::new(Capability::Graphics, "zeta-gfx"),
                ))
            })
            .register("/m/alpha.so", || {
                Ok(table_for(
                    Capability::Audio,
                    StubModule::new(Capability::Audio, "alpha-audio"),
                ))
            });
        let registry = PluginRegistry::new(Box::new(loader));

        let listings = registry.enumerate(Path::new("/m"));
        let names: Vec<&str> = listings.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec![NO_MODULE, "alpha-audio", "zeta-gfx"]);
    }

    #[test]
    fn test_shutdown_all_is_best_effort_and_reentrant() {
        let mut registry = registry();
        let session = session();

        let good = StubModule::new(Capability::Graphics, "gfx");
        let good_counters = good.counters();
        registry
            .hook(
                Capability::Graphics,
                LoadedModule::new(table_for(Capability::Graphics, good)),
            )
            .unwrap();
        registry.start(Capability::Graphics, &session).unwrap();

        let bad = StubModule::new(Capability::Audio, "aud").failing_shutdown();
        registry
            .hook(
                Capability::Audio,
                LoadedModule::new(table_for(Capability::Audio, bad)),
            )
            .unwrap();
        registry.start(Capability::Audio, &session).unwrap();

        registry.shutdown_all();
        assert_eq!(good_counters.shutdowns.load(Ordering::SeqCst), 1);
        for capability in Capability::ALL {
            assert!(!registry.is_hooked(capability));
            assert!(!registry.is_started(capability));
        }

        registry.shutdown_all();
    }

    #[test]
    fn test_media_open_failure_rolls_back_in_reverse() {
        let mut registry = registry();
        let session = session();

        let gfx = StubModule::new(Capability::Graphics, "gfx");
        let gfx_counters = gfx.counters();
        registry
            .hook(
                Capability::Graphics,
                LoadedModule::new(table_for(Capability::Graphics, gfx)),
            )
            .unwrap();
        registry.start(Capability::Graphics, &session).unwrap();

        let aud = StubModule::new(Capability::Audio, "aud").failing_media_open();
        registry
            .hook(
                Capability::Audio,
                LoadedModule::new(table_for(Capability::Audio, aud)),
            )
            .unwrap();
        registry.start(Capability::Audio, &session).unwrap();

        let err = registry.media_open_all().unwrap_err();
        assert!(matches!(
            err,
            HostError::ModuleFailure {
                capability: Capability::Audio,
                phase: ModulePhase::MediaOpen,
                ..
            }
        ));
        assert_eq!(gfx_counters.media_opens.load(Ordering::SeqCst), 1);
        assert_eq!(gfx_counters.media_closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_media_open_close_all_walk_started_slots() {
        let mut registry = registry();
        let session = session();

        let gfx = StubModule::new(Capability::Graphics, "gfx");
        let gfx_counters = gfx.counters();
        registry
            .hook(
                Capability::Graphics,
                LoadedModule::new(table_for(Capability::Graphics, gfx)),
            )
            .unwrap();
        registry.start(Capability::Graphics, &session).unwrap();

        // Hooked but never started; must not see media events
        let idle = StubModule::new(Capability::Input, "inp");
        let idle_counters = idle.counters();
        registry
            .hook(
                Capability::Input,
                LoadedModule::new(table_for(Capability::Input, idle)),
            )
            .unwrap();

        registry.media_open_all().unwrap();
        registry.media_close_all();

        assert_eq!(gfx_counters.media_opens.load(Ordering::SeqCst), 1);
        assert_eq!(gfx_counters.media_closes.load(Ordering::SeqCst), 1);
        assert_eq!(idle_counters.media_opens.load(Ordering::SeqCst), 0);
        assert_eq!(idle_counters.media_closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_and_hook_occupied_slot_does_not_load() {
        let loader = StubLoader::new().register("/m/rsp.so", || {
            Ok(table_for(
                Capability::Rsp,
                StubModule::new(Capability::Rsp, "rsp-core"),
            ))
        });
        let loads = loader.load_counter();
        let mut registry = PluginRegistry::new(Box::new(loader));

        registry
            .load_and_hook(Capability::Rsp, Path::new("/m/rsp.so"))
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let err = registry
            .load_and_hook(Capability::Rsp, Path::new("/m/rsp.so"))
            .unwrap_err();
        assert!(matches!(err, HostError::AlreadyHooked(Capability::Rsp)));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
