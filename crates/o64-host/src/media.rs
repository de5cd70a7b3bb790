//! Open media, title settings and cheat bookkeeping
//!
//! The store holds whatever image the session has open plus the per-title
//! metadata derived from it. It never calls into modules; the dispatcher
//! and the run loop are its only consumers.

use std::collections::HashMap;
use std::fmt;

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use o64_core::{HostError, Result};

/// Accepted ROM image size range
pub const ROM_IMAGE_MIN: usize = 4096;
pub const ROM_IMAGE_MAX: usize = 64 * 1024 * 1024;

/// Accepted boot image size range; boot images are word granular
pub const BOOT_IMAGE_MIN: usize = 1984;
pub const BOOT_IMAGE_MAX: usize = 2048;

/// Length of the media header retained for queries
pub const HEADER_LEN: usize = 64;

const NAME_OFFSET: usize = 0x20;
const NAME_LEN: usize = 20;
const CRC1_OFFSET: usize = 0x10;
const CRC2_OFFSET: usize = 0x14;

/// Reject images outside the supported ROM size range
pub fn validate_rom_image(image: &[u8]) -> Result<()> {
    if image.len() < ROM_IMAGE_MIN {
        return Err(HostError::invalid_argument(format!(
            "ROM image of {} bytes is below the {} byte minimum",
            image.len(),
            ROM_IMAGE_MIN
        )));
    }
    if image.len() > ROM_IMAGE_MAX {
        return Err(HostError::invalid_argument(format!(
            "ROM image of {} bytes exceeds the {} byte maximum",
            image.len(),
            ROM_IMAGE_MAX
        )));
    }
    Ok(())
}

/// Reject boot images outside the supported range or off word granularity
pub fn validate_boot_image(image: &[u8]) -> Result<()> {
    if !(BOOT_IMAGE_MIN..=BOOT_IMAGE_MAX).contains(&image.len()) {
        return Err(HostError::invalid_argument(format!(
            "boot image of {} bytes outside {}..={}",
            image.len(),
            BOOT_IMAGE_MIN,
            BOOT_IMAGE_MAX
        )));
    }
    if image.len() % 4 != 0 {
        return Err(HostError::invalid_argument(format!(
            "boot image of {} bytes is not a whole number of words",
            image.len()
        )));
    }
    Ok(())
}

/// A disk image only needs to carry a full header
pub fn validate_disk_image(image: &[u8]) -> Result<()> {
    if image.len() < HEADER_LEN {
        return Err(HostError::invalid_argument(format!(
            "disk image of {} bytes is below the {} byte header",
            image.len(),
            HEADER_LEN
        )));
    }
    Ok(())
}

/// First header's worth of an open image, kept for queries after open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHeader {
    bytes: [u8; HEADER_LEN],
}

impl MediaHeader {
    /// Copy the header out of an image. Short images are zero padded; both
    /// open paths validate the minimum length before this runs.
    pub fn from_image(image: &[u8]) -> Self {
        let mut bytes = [0u8; HEADER_LEN];
        let take = image.len().min(HEADER_LEN);
        bytes[..take].copy_from_slice(&image[..take]);
        Self { bytes }
    }

    /// Title name embedded in the header, trailing padding stripped
    pub fn internal_name(&self) -> String {
        let raw = &self.bytes[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        String::from_utf8_lossy(raw)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    pub fn crc1(&self) -> u32 {
        u32::from_be_bytes([
            self.bytes[CRC1_OFFSET],
            self.bytes[CRC1_OFFSET + 1],
            self.bytes[CRC1_OFFSET + 2],
            self.bytes[CRC1_OFFSET + 3],
        ])
    }

    pub fn crc2(&self) -> u32 {
        u32::from_be_bytes([
            self.bytes[CRC2_OFFSET],
            self.bytes[CRC2_OFFSET + 1],
            self.bytes[CRC2_OFFSET + 2],
            self.bytes[CRC2_OFFSET + 3],
        ])
    }

    /// Leading slice of the header, capped at the retained length
    pub fn prefix(&self, max_len: usize) -> &[u8] {
        &self.bytes[..max_len.min(HEADER_LEN)]
    }

    pub fn bytes(&self) -> &[u8; HEADER_LEN] {
        &self.bytes
    }
}

/// Persistent save hardware a title expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveKind {
    #[default]
    Eeprom4k,
    Eeprom16k,
    Sram,
    FlashRam,
    ControllerPak,
    None,
}

impl fmt::Display for SaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveKind::Eeprom4k => "EEPROM 4k",
            SaveKind::Eeprom16k => "EEPROM 16k",
            SaveKind::Sram => "SRAM",
            SaveKind::FlashRam => "Flash RAM",
            SaveKind::ControllerPak => "Controller Pak",
            SaveKind::None => "none",
        };
        write!(f, "{name}")
    }
}

/// Per-title metadata, either from the title table or synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSettings {
    pub name: String,
    /// Uppercase hex SHA-1 of the whole image
    pub digest: String,
    pub save_kind: SaveKind,
    pub players: u8,
    pub rumble: bool,
}

/// Known-title database keyed by image digest
#[derive(Debug, Default)]
pub struct TitleTable {
    entries: HashMap<String, TitleSettings>,
}

impl TitleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, settings: TitleSettings) {
        self.entries.insert(settings.digest.clone(), settings);
    }

    pub fn get(&self, digest: &str) -> Option<&TitleSettings> {
        self.entries.get(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One patch entry applied while enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheatCode {
    pub address: u32,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cheat {
    pub name: String,
    pub codes: Vec<CheatCode>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Rom,
    Disk,
}

#[derive(Debug)]
struct OpenMedia {
    kind: MediaKind,
    header: MediaHeader,
    settings: TitleSettings,
    image: Vec<u8>,
}

/// Everything the host tracks about the open image and its session extras
#[derive(Debug, Default)]
pub struct MediaStore {
    media: Option<OpenMedia>,
    boot_image: Option<Vec<u8>>,
    cheats: Vec<Cheat>,
    capture_counter: u64,
    capture_pending: bool,
}

impl MediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a validated ROM image. Title metadata comes from the table when
    /// the digest is known, otherwise it is synthesized from the header.
    pub fn open_rom(&mut self, image: &[u8], table: &TitleTable) {
        let header = MediaHeader::from_image(image);
        let digest = image_digest(image);
        let settings = match table.get(&digest) {
            Some(known) => {
                debug!("title table hit for {digest}");
                known.clone()
            }
            None => synthesize_settings(&header, digest),
        };
        info!(
            "ROM open: '{}' ({} bytes, save {})",
            settings.name,
            image.len(),
            settings.save_kind
        );
        self.adopt(MediaKind::Rom, header, settings, image.to_vec());
    }

    /// Adopt a validated disk image
    pub fn open_disk(&mut self, image: &[u8], table: &TitleTable) {
        let header = MediaHeader::from_image(image);
        let digest = image_digest(image);
        let settings = match table.get(&digest) {
            Some(known) => known.clone(),
            None => synthesize_settings(&header, digest),
        };
        info!("disk open: '{}' ({} bytes)", settings.name, image.len());
        self.adopt(MediaKind::Disk, header, settings, image.to_vec());
    }

    fn adopt(&mut self, kind: MediaKind, header: MediaHeader, settings: TitleSettings, image: Vec<u8>) {
        self.media = Some(OpenMedia {
            kind,
            header,
            settings,
            image,
        });
        self.cheats.clear();
        self.capture_counter = 0;
        self.capture_pending = false;
    }

    /// Drop the open image and everything scoped to it. The boot image is
    /// host scoped and survives.
    pub fn close(&mut self) {
        if let Some(media) = self.media.take() {
            info!("media closed: '{}'", media.settings.name);
        }
        self.cheats.clear();
        self.capture_pending = false;
    }

    pub fn is_open(&self) -> bool {
        self.media.is_some()
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.media.as_ref().map(|media| media.kind)
    }

    pub fn header(&self) -> Option<&MediaHeader> {
        self.media.as_ref().map(|media| &media.header)
    }

    pub fn settings(&self) -> Option<&TitleSettings> {
        self.media.as_ref().map(|media| &media.settings)
    }

    pub fn digest(&self) -> Option<&str> {
        self.settings().map(|settings| settings.digest.as_str())
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.media.as_ref().map(|media| media.image.as_slice())
    }

    /// Replace the stored title metadata for the open image
    pub fn set_settings(&mut self, settings: TitleSettings) -> Result<()> {
        match self.media.as_mut() {
            Some(media) => {
                media.settings = settings;
                Ok(())
            }
            None => Err(HostError::invalid_state("no media open")),
        }
    }

    pub fn set_boot_image(&mut self, image: &[u8]) {
        info!("boot image installed ({} bytes)", image.len());
        self.boot_image = Some(image.to_vec());
    }

    pub fn boot_image(&self) -> Option<&[u8]> {
        self.boot_image.as_deref()
    }

    /// Add a cheat, replacing any existing entry with the same name.
    /// New entries start disabled.
    pub fn add_cheat(&mut self, name: &str, codes: &[CheatCode]) {
        if let Some(existing) = self.cheats.iter_mut().find(|cheat| cheat.name == name) {
            existing.codes = codes.to_vec();
            return;
        }
        self.cheats.push(Cheat {
            name: name.to_string(),
            codes: codes.to_vec(),
            enabled: false,
        });
    }

    pub fn set_cheat_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        match self.cheats.iter_mut().find(|cheat| cheat.name == name) {
            Some(cheat) => {
                cheat.enabled = enabled;
                Ok(())
            }
            None => Err(HostError::NotFound(format!("no cheat named '{name}'"))),
        }
    }

    pub fn cheats(&self) -> &[Cheat] {
        &self.cheats
    }

    /// Arm a capture for the next frame boundary
    pub fn request_capture(&mut self) {
        self.capture_pending = true;
    }

    /// Consume an armed capture, yielding its serial number
    pub fn consume_capture(&mut self) -> Option<u64> {
        if !self.capture_pending {
            return None;
        }
        self.capture_pending = false;
        self.capture_counter += 1;
        Some(self.capture_counter)
    }
}

/// Uppercase hex SHA-1 over the whole image, the key titles are known by
pub fn image_digest(image: &[u8]) -> String {
    format!("{:X}", Sha1::digest(image))
}

fn synthesize_settings(header: &MediaHeader, digest: String) -> TitleSettings {
    let internal = header.internal_name();
    let name = if internal.is_empty() {
        "(unknown title)".to_string()
    } else {
        internal
    };
    TitleSettings {
        name,
        digest,
        save_kind: SaveKind::default(),
        players: 4,
        rumble: true,
    }
}
