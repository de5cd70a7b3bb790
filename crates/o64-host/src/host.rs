//! The host: one façade owning the registry, session, media and netplay
//!
//! A front end builds a `Host`, calls `startup`, then drives everything
//! through `execute` and the module management methods. Every entry point
//! validates in the same order: initialization, arguments, session state,
//! then the actual work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use o64_core::version::{format_version, same_major, CONTROL_API_VERSION};
use o64_core::{
    Capability, Config, ConfigResolver, HostError, ModulePhase, OverlayResolver, Result,
    SessionContext, SessionHandle, SessionState, TitleSelector,
};
use o64_plugin::{
    FrameBuffer, KeyEvent, ModuleDescriptor, ModuleListing, ModuleLoader, NativeLoader,
    PluginRegistry, ResetKind,
};

use crate::command::{Command, CommandReply, EmuState, FrameCallback, MediaLoader, StateField};
use crate::media::{
    validate_boot_image, validate_disk_image, validate_rom_image, MediaStore, TitleTable,
};
use crate::netplay::Netplay;
use crate::runner::run_loop;
use crate::savestate::{
    read_state, slot_path, write_state, StateSnapshot, MAX_STATE_FORMAT, NATIVE_STATE_FORMAT,
};

/// The emulation host. One instance per process is the intended shape;
/// nothing enforces it.
pub struct Host {
    config: Config,
    registry: PluginRegistry,
    session: SessionHandle,
    media: MediaStore,
    title_table: TitleTable,
    netplay: Netplay,
    frame_callback: Option<FrameCallback>,
    media_loader: Option<Box<dyn MediaLoader>>,
    initialized: bool,
    shut_down: bool,
}

impl Host {
    pub fn new(config: Config) -> Self {
        Self::with_loader(config, Box::new(NativeLoader::new()))
    }

    /// Build a host around a custom module loader
    pub fn with_loader(config: Config, loader: Box<dyn ModuleLoader>) -> Self {
        let session: SessionHandle = Arc::new(SessionContext::new(SessionState::from_config(
            &config.session,
        )));
        Self {
            registry: PluginRegistry::new(loader),
            session,
            media: MediaStore::new(),
            title_table: TitleTable::new(),
            netplay: Netplay::new(),
            frame_callback: None,
            media_loader: None,
            initialized: false,
            shut_down: false,
            config,
        }
    }

    /// Bring the host up for a front end targeting the given control API
    /// version. Majors must match; a host instance cannot be revived after
    /// `shutdown`.
    pub fn startup(&mut self, api_version: u32) -> Result<()> {
        if self.initialized {
            return Err(HostError::AlreadyInitialized);
        }
        if self.shut_down {
            return Err(HostError::invalid_state("host has already shut down"));
        }
        if !same_major(api_version, CONTROL_API_VERSION) {
            return Err(HostError::Incompatible(format!(
                "front end targets control API {}, host provides {}",
                format_version(api_version),
                format_version(CONTROL_API_VERSION)
            )));
        }
        self.initialized = true;
        info!(
            "host initialized (control API {})",
            format_version(CONTROL_API_VERSION)
        );
        Ok(())
    }

    /// Tear everything down: modules, media, netplay, callbacks
    pub fn shutdown(&mut self) -> Result<()> {
        self.ensure_initialized()?;

        self.registry.shutdown_all();
        self.media.close();
        {
            let mut state = self.session.state_mut();
            state.end_run();
            if state.rom_open() {
                let _ = state.close_rom();
            }
            if state.disk_open() {
                let _ = state.close_disk();
            }
        }
        self.session.signals().clear();
        if self.netplay.active() {
            let _ = self.netplay.close();
        }
        self.frame_callback = None;
        self.media_loader = None;
        self.initialized = false;
        self.shut_down = true;
        info!("host shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Install the known-title database consulted at media open
    pub fn set_title_table(&mut self, table: TitleTable) {
        self.title_table = table;
    }

    /// Handle shared with the run loop and capability modules
    pub fn session_handle(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Hook and start one module. Only allowed while media is open and the
    /// session is stopped. A start failure leaves the module hooked; detach
    /// it or retry through `apply_module_settings`.
    pub fn attach_module(&mut self, capability: Capability, path: &Path) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_module_window()?;
        self.registry.load_and_hook(capability, path)?;
        self.registry.start(capability, &self.session)
    }

    /// Stop and unhook one module under the same gating as `attach_module`
    pub fn detach_module(&mut self, capability: Capability) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_module_window()?;
        if self.registry.is_started(capability) {
            self.registry.stop(capability)?;
        }
        self.registry.unhook(capability)
    }

    /// Reconcile the registry against the configured module bindings. The
    /// per-title override tier applies when media is open; otherwise the
    /// global tier alone decides.
    pub fn apply_module_settings(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if self.session.state().running() {
            return Err(HostError::invalid_state(
                "module bindings are locked while running",
            ));
        }
        let overlay = match self.title_key() {
            Some(key) => ConfigResolver::for_title(&self.config, &key).overlay(),
            None => ConfigResolver::global(&self.config).overlay(),
        };
        self.registry.apply_settings(&overlay, &self.session)
    }

    /// Scan a directory for loadable modules; defaults to the configured
    /// module root
    pub fn enumerate_modules(&self, directory: Option<&Path>) -> Result<Vec<ModuleListing>> {
        self.ensure_initialized()?;
        let directory = directory.unwrap_or(&self.config.paths.modules);
        Ok(self.registry.enumerate(directory))
    }

    pub fn modules_ready(&self) -> bool {
        self.registry.all_ready()
    }

    pub fn module_descriptor(&self, capability: Capability) -> Option<&ModuleDescriptor> {
        self.registry.descriptor(capability)
    }

    /// Validate and run one command
    pub fn execute(&mut self, command: Command<'_>) -> Result<CommandReply> {
        self.ensure_initialized()?;

        match command {
            Command::RomOpen { image } => {
                validate_rom_image(image)?;
                self.session.state_mut().open_rom()?;
                self.media.open_rom(image, &self.title_table);
                Ok(CommandReply::Done)
            }

            Command::RomClose => {
                self.session.state_mut().close_rom()?;
                self.media.close();
                Ok(CommandReply::Done)
            }

            Command::DiskOpen => {
                let path = self
                    .media_loader
                    .as_mut()
                    .and_then(|loader| loader.disk_image_path())
                    .filter(|path| !path.as_os_str().is_empty())
                    .ok_or_else(|| {
                        HostError::NotFound("no disk image source is registered".to_string())
                    })?;
                let image = std::fs::read(&path).map_err(|err| {
                    if err.kind() == std::io::ErrorKind::NotFound {
                        HostError::NotFound(format!("no disk image at {}", path.display()))
                    } else {
                        HostError::Io(err)
                    }
                })?;
                validate_disk_image(&image)?;
                self.session.state_mut().open_disk()?;
                self.media.open_disk(&image, &self.title_table);
                Ok(CommandReply::Done)
            }

            Command::DiskClose => {
                self.session.state_mut().close_disk()?;
                self.media.close();
                Ok(CommandReply::Done)
            }

            Command::BootImageOpen { image } => {
                validate_boot_image(image)?;
                if self.session.state().running() {
                    return Err(HostError::invalid_state(
                        "cannot replace the boot image while running",
                    ));
                }
                self.media.set_boot_image(image);
                Ok(CommandReply::Done)
            }

            Command::GetHeader { max_len } => {
                if max_len == 0 {
                    return Err(HostError::invalid_argument("header request of zero bytes"));
                }
                let header = self
                    .media
                    .header()
                    .ok_or_else(|| HostError::invalid_state("no media open"))?;
                Ok(CommandReply::Header(header.prefix(max_len).to_vec()))
            }

            Command::GetTitleSettings => {
                let settings = self
                    .media
                    .settings()
                    .ok_or_else(|| HostError::invalid_state("no media open"))?;
                Ok(CommandReply::TitleSettings(settings.clone()))
            }

            Command::SetTitleSettings { settings } => {
                if !(1..=4).contains(&settings.players) {
                    return Err(HostError::invalid_argument(format!(
                        "player count {} outside 1..=4",
                        settings.players
                    )));
                }
                self.media.set_settings(settings)?;
                Ok(CommandReply::Done)
            }

            Command::Execute => {
                self.session.state_mut().begin_run()?;
                run_loop(
                    &mut self.registry,
                    &self.session,
                    &mut self.media,
                    &mut self.frame_callback,
                )?;
                Ok(CommandReply::Done)
            }

            Command::Stop => {
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                self.session.request_stop();
                Ok(CommandReply::Done)
            }

            Command::Pause => {
                self.session.state_mut().pause()?;
                Ok(CommandReply::Done)
            }

            Command::Resume => {
                self.session.state_mut().resume()?;
                Ok(CommandReply::Done)
            }

            Command::QueryState { field } => Ok(CommandReply::StateValue(
                self.query_state_field(field),
            )),

            Command::SetState { field, value } => {
                self.set_state_field(field, value)?;
                Ok(CommandReply::Done)
            }

            Command::SaveState { slot } => {
                if let Some(slot) = slot {
                    if slot > 9 {
                        return Err(HostError::invalid_argument(format!(
                            "save slot {slot} outside 0..=9"
                        )));
                    }
                }
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                let slot = slot.unwrap_or_else(|| self.session.state().save_slot());
                let path = self.slot_state_path(slot)?;
                write_state(&path, &self.session_snapshot()?)?;
                Ok(CommandReply::Done)
            }

            Command::LoadState { slot } => {
                if let Some(slot) = slot {
                    if slot > 9 {
                        return Err(HostError::invalid_argument(format!(
                            "save slot {slot} outside 0..=9"
                        )));
                    }
                }
                if !self.media.is_open() {
                    return Err(HostError::invalid_state("no media open"));
                }
                let slot = slot.unwrap_or_else(|| self.session.state().save_slot());
                let path = self.slot_state_path(slot)?;
                self.restore_snapshot(&read_state(&path)?)?;
                Ok(CommandReply::Done)
            }

            Command::SaveStateTo { path, format } => {
                if !(1..=MAX_STATE_FORMAT).contains(&format) {
                    return Err(HostError::invalid_argument(format!(
                        "state format {format} outside 1..={MAX_STATE_FORMAT}"
                    )));
                }
                if format != NATIVE_STATE_FORMAT {
                    return Err(HostError::invalid_argument(format!(
                        "only state format {NATIVE_STATE_FORMAT} can be written"
                    )));
                }
                if path.as_os_str().is_empty() {
                    return Err(HostError::invalid_argument("empty state path"));
                }
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                write_state(path, &self.session_snapshot()?)?;
                Ok(CommandReply::Done)
            }

            Command::LoadStateFrom { path } => {
                if path.as_os_str().is_empty() {
                    return Err(HostError::invalid_argument("empty state path"));
                }
                if !self.media.is_open() {
                    return Err(HostError::invalid_state("no media open"));
                }
                self.restore_snapshot(&read_state(path)?)?;
                Ok(CommandReply::Done)
            }

            Command::SetSaveSlot { slot } => {
                self.session.state_mut().set_save_slot(slot)?;
                Ok(CommandReply::Done)
            }

            Command::KeyDown { raw } => {
                self.deliver_key(raw, true)?;
                Ok(CommandReply::Done)
            }

            Command::KeyUp { raw } => {
                self.deliver_key(raw, false)?;
                Ok(CommandReply::Done)
            }

            Command::RequestCapture => {
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                self.media.request_capture();
                Ok(CommandReply::Done)
            }

            Command::ReadFrame { buffer } => {
                let buffer = FrameBuffer::from_raw(buffer).ok_or_else(|| {
                    HostError::invalid_argument(format!("unknown frame buffer {buffer}"))
                })?;
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                let graphics = self
                    .registry
                    .graphics_mut()
                    .ok_or_else(|| HostError::invalid_state("no graphics module is started"))?;
                let capture = graphics.read_frame(buffer).map_err(|reason| {
                    HostError::module_failure(Capability::Graphics, ModulePhase::Capture, reason)
                })?;
                Ok(CommandReply::Frame(capture))
            }

            Command::Reset { kind } => {
                let kind = ResetKind::from_raw(kind).ok_or_else(|| {
                    HostError::invalid_argument(format!("unknown reset kind {kind}"))
                })?;
                if !self.session.state().running() {
                    return Err(HostError::invalid_state("session is not running"));
                }
                let execution = self
                    .registry
                    .execution_mut()
                    .ok_or_else(|| HostError::invalid_state("no execution module is started"))?;
                execution.reset(kind).map_err(|reason| {
                    HostError::module_failure(Capability::Execution, ModulePhase::Reset, reason)
                })?;
                info!("{kind:?} reset delivered");
                Ok(CommandReply::Done)
            }

            Command::AdvanceFrame => {
                {
                    let mut state = self.session.state_mut();
                    if !state.running() {
                        return Err(HostError::invalid_state("session is not running"));
                    }
                    if !state.paused() {
                        state.pause()?;
                    }
                }
                self.session.signals().request_step();
                Ok(CommandReply::Done)
            }

            Command::SetFrameCallback { callback } => {
                self.frame_callback = callback;
                Ok(CommandReply::Done)
            }

            Command::SetMediaLoader { loader } => {
                self.media_loader = loader;
                Ok(CommandReply::Done)
            }

            Command::AddCheat { name, codes } => {
                if name.trim().is_empty() {
                    return Err(HostError::invalid_argument("empty cheat name"));
                }
                if codes.is_empty() {
                    return Err(HostError::invalid_argument(format!(
                        "cheat '{name}' has no codes"
                    )));
                }
                self.ensure_cheats_unlocked()?;
                self.media.add_cheat(name, codes);
                Ok(CommandReply::Done)
            }

            Command::SetCheatEnabled { name, enabled } => {
                if name.trim().is_empty() {
                    return Err(HostError::invalid_argument("empty cheat name"));
                }
                self.ensure_cheats_unlocked()?;
                self.media.set_cheat_enabled(name, enabled)?;
                Ok(CommandReply::Done)
            }

            Command::NetplayInit { host, port } => {
                self.netplay.init(host, port)?;
                Ok(CommandReply::Done)
            }

            Command::NetplayRegisterPlayer {
                player,
                registration_id,
            } => {
                self.netplay.register_player(player, registration_id)?;
                Ok(CommandReply::Done)
            }

            Command::NetplayVersionCheck { api_version } => Ok(CommandReply::NetplayVersion(
                self.netplay.version_check(api_version)?,
            )),

            Command::NetplayClose => {
                self.netplay.close()?;
                Ok(CommandReply::Done)
            }
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(HostError::NotInitialized);
        }
        Ok(())
    }

    /// Module attach and detach are only legal while media is open and the
    /// session is stopped
    fn ensure_module_window(&self) -> Result<()> {
        let state = self.session.state();
        if !state.media_open() {
            return Err(HostError::invalid_state("no media open"));
        }
        if state.running() {
            return Err(HostError::invalid_state(
                "module bindings are locked while running",
            ));
        }
        Ok(())
    }

    fn ensure_cheats_unlocked(&self) -> Result<()> {
        if self.netplay.active() {
            return Err(HostError::invalid_state(
                "cheats are locked during a netplay session",
            ));
        }
        if !self.media.is_open() {
            return Err(HostError::invalid_state("no media open"));
        }
        Ok(())
    }

    fn title_key(&self) -> Option<String> {
        let settings = self.media.settings()?;
        Some(match self.config.session.title_selector {
            TitleSelector::InternalName => settings.name.clone(),
            TitleSelector::Digest => settings.digest.clone(),
        })
    }

    fn query_state_field(&self, field: StateField) -> u32 {
        let state = self.session.state();
        match field {
            StateField::EmuState => EmuState::from_run_state(state.run_state()).as_raw(),
            StateField::SaveSlot => u32::from(state.save_slot()),
            StateField::SpeedFactor => state.speed_factor(),
            StateField::SpeedLimiter => u32::from(state.speed_limited()),
            StateField::AudioVolume => u32::from(state.volume()),
            StateField::AudioMute => u32::from(state.muted()),
        }
    }

    fn set_state_field(&mut self, field: StateField, value: u32) -> Result<()> {
        match field {
            StateField::EmuState => {
                let target = EmuState::from_raw(value).ok_or_else(|| {
                    HostError::invalid_argument(format!("unknown emulation state {value}"))
                })?;
                match target {
                    EmuState::Stopped => {
                        if !self.session.state().running() {
                            return Err(HostError::invalid_state("session is not running"));
                        }
                        self.session.request_stop();
                        Ok(())
                    }
                    EmuState::Running => self.session.state_mut().resume(),
                    EmuState::Paused => self.session.state_mut().pause(),
                }
            }
            StateField::SaveSlot => {
                let slot = u8::try_from(value).map_err(|_| {
                    HostError::invalid_argument(format!("save slot {value} outside 0..=9"))
                })?;
                self.session.state_mut().set_save_slot(slot)
            }
            StateField::SpeedFactor => self.session.state_mut().set_speed_factor(value),
            StateField::SpeedLimiter => {
                self.session.state_mut().set_speed_limited(value != 0);
                Ok(())
            }
            StateField::AudioVolume => {
                let volume = u8::try_from(value).map_err(|_| {
                    HostError::invalid_argument(format!("volume {value} outside 0..=100"))
                })?;
                self.session.state_mut().set_volume(volume)?;
                self.forward_volume()
            }
            StateField::AudioMute => {
                self.session.state_mut().set_muted(value != 0);
                self.forward_volume()
            }
        }
    }

    /// Push the session's volume fields to a started audio module
    fn forward_volume(&mut self) -> Result<()> {
        let (volume, muted) = {
            let state = self.session.state();
            (state.volume(), state.muted())
        };
        if let Some(audio) = self.registry.audio_mut() {
            audio.set_volume(volume, muted).map_err(|reason| {
                HostError::module_failure(Capability::Audio, ModulePhase::Configure, reason)
            })?;
        }
        Ok(())
    }

    fn deliver_key(&mut self, raw: u32, pressed: bool) -> Result<()> {
        if !self.session.state().running() {
            return Err(HostError::invalid_state("session is not running"));
        }
        let event = KeyEvent::from_raw(raw);
        if let Some(input) = self.registry.input_mut() {
            let delivered = if pressed {
                input.key_down(event)
            } else {
                input.key_up(event)
            };
            if let Err(reason) = delivered {
                warn!("input module rejected key event: {reason}");
            }
        }
        Ok(())
    }

    fn slot_state_path(&self, slot: u8) -> Result<PathBuf> {
        let settings = self
            .media
            .settings()
            .ok_or_else(|| HostError::invalid_state("no media open"))?;
        Ok(slot_path(&self.config.paths.states, &settings.name, slot))
    }

    fn session_snapshot(&self) -> Result<StateSnapshot> {
        let digest = self
            .media
            .digest()
            .ok_or_else(|| HostError::invalid_state("no media open"))?
            .to_string();
        let state = self.session.state();
        Ok(StateSnapshot {
            digest,
            save_slot: state.save_slot(),
            speed_factor: state.speed_factor(),
            speed_limited: state.speed_limited(),
            volume: state.volume(),
            muted: state.muted(),
        })
    }

    /// Apply a snapshot read back from disk. The reader range checks every
    /// field, so only the title guard can reject here.
    fn restore_snapshot(&mut self, snapshot: &StateSnapshot) -> Result<()> {
        let open_digest = self
            .media
            .digest()
            .ok_or_else(|| HostError::invalid_state("no media open"))?;
        if snapshot.digest != open_digest {
            return Err(HostError::Incompatible(format!(
                "state belongs to digest {}, open media is {}",
                snapshot.digest, open_digest
            )));
        }
        {
            let mut state = self.session.state_mut();
            state.set_save_slot(snapshot.save_slot)?;
            state.set_speed_factor(snapshot.speed_factor)?;
            state.set_speed_limited(snapshot.speed_limited);
            state.set_volume(snapshot.volume)?;
            state.set_muted(snapshot.muted);
        }
        self.forward_volume()
    }
}
