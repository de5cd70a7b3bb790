//! Save-state files: a gzip stream framing the restorable session fields
//!
//! The payload is deliberately small. Module internals are not captured;
//! a state file records which title it belongs to and the session knobs a
//! restore should reinstate. All integers are little endian.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use o64_core::{HostError, Result};

const STATE_MAGIC: &[u8] = b"O64STATE";
const STATE_VERSION: u32 = 1;

/// The one format id the writer emits
pub const NATIVE_STATE_FORMAT: u32 = 1;

/// Highest format id the command surface recognizes
pub const MAX_STATE_FORMAT: u32 = 3;

const MAX_DIGEST_LEN: usize = 64;

/// Session fields a state file carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Digest of the image the state was taken from
    pub digest: String,
    pub save_slot: u8,
    pub speed_factor: u32,
    pub speed_limited: bool,
    pub volume: u8,
    pub muted: bool,
}

/// Write a snapshot, creating the parent directory when needed
pub fn write_state(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(STATE_MAGIC)?;
    encoder.write_all(&STATE_VERSION.to_le_bytes())?;

    let digest = snapshot.digest.as_bytes();
    encoder.write_all(&(digest.len() as u32).to_le_bytes())?;
    encoder.write_all(digest)?;

    encoder.write_all(&[snapshot.save_slot])?;
    encoder.write_all(&snapshot.speed_factor.to_le_bytes())?;
    encoder.write_all(&[
        snapshot.speed_limited as u8,
        snapshot.volume,
        snapshot.muted as u8,
    ])?;
    encoder.finish()?;

    info!("state written to {}", path.display());
    Ok(())
}

/// Read a snapshot back. The returned fields are range checked, so applying
/// them to a session cannot fail.
pub fn read_state(path: &Path) -> Result<StateSnapshot> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            HostError::NotFound(format!("no state file at {}", path.display()))
        } else {
            HostError::Io(err)
        }
    })?;

    let mut raw = Vec::new();
    GzDecoder::new(file).read_to_end(&mut raw).map_err(|err| {
        match err.kind() {
            ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                HostError::Incompatible(format!("{} is not a state file", path.display()))
            }
            _ => HostError::Io(err),
        }
    })?;

    let mut buf = raw.as_slice();
    if take(&mut buf, STATE_MAGIC.len())? != STATE_MAGIC {
        return Err(HostError::Incompatible(format!(
            "{} is not a state file",
            path.display()
        )));
    }
    let version = take_u32(&mut buf)?;
    if version != STATE_VERSION {
        return Err(HostError::Incompatible(format!(
            "state format {version} is not supported"
        )));
    }

    let digest_len = take_u32(&mut buf)? as usize;
    if digest_len > MAX_DIGEST_LEN {
        return Err(corrupt(path));
    }
    let digest = String::from_utf8_lossy(take(&mut buf, digest_len)?).into_owned();

    let save_slot = take_u8(&mut buf)?;
    let speed_factor = take_u32(&mut buf)?;
    let speed_limited = take_u8(&mut buf)? != 0;
    let volume = take_u8(&mut buf)?;
    let muted = take_u8(&mut buf)? != 0;

    if save_slot > 9 || !(1..=1000).contains(&speed_factor) || volume > 100 {
        return Err(corrupt(path));
    }

    Ok(StateSnapshot {
        digest,
        save_slot,
        speed_factor,
        speed_limited,
        volume,
        muted,
    })
}

/// File path for a numbered slot under the states directory
pub fn slot_path(states_dir: &Path, title_name: &str, slot: u8) -> PathBuf {
    states_dir.join(format!("{}.st{slot}", sanitize_title(title_name)))
}

/// Title names come from media headers and can hold anything; keep the
/// file name flat.
fn sanitize_title(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        "media".to_string()
    } else {
        cleaned
    }
}

fn corrupt(path: &Path) -> HostError {
    HostError::Incompatible(format!(
        "state file {} holds out-of-range session values",
        path.display()
    ))
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(HostError::Incompatible("state file is truncated".to_string()));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    let bytes = take(buf, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take(buf, 1)?[0])
}
