//! Local netplay session bookkeeping
//!
//! Tracks the lifecycle and player registrations of a netplay session.
//! Transport is the front end's problem; the host only needs to know that a
//! session exists so it can lock cheats and answer version checks.

use tracing::{debug, info};

use o64_core::version::{
    format_version, same_major, NETPLAY_API_VERSION, NETPLAY_CORE_VERSION,
};
use o64_core::{HostError, Result};

pub const NETPLAY_PLAYERS: usize = 4;

#[derive(Debug)]
struct NetplaySession {
    endpoint: String,
    players: [Option<u32>; NETPLAY_PLAYERS],
}

/// At most one netplay session exists per host
#[derive(Debug, Default)]
pub struct Netplay {
    session: Option<NetplaySession>,
}

impl Netplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session against the given endpoint
    pub fn init(&mut self, host: &str, port: u16) -> Result<()> {
        if host.trim().is_empty() {
            return Err(HostError::invalid_argument("empty netplay host"));
        }
        if port == 0 {
            return Err(HostError::invalid_argument("netplay port 0 is not usable"));
        }
        if self.session.is_some() {
            return Err(HostError::invalid_state(
                "a netplay session is already active",
            ));
        }

        let endpoint = format!("{host}:{port}");
        info!(
            "netplay session bound to {endpoint} (protocol {})",
            format_version(NETPLAY_CORE_VERSION)
        );
        self.session = Some(NetplaySession {
            endpoint,
            players: [None; NETPLAY_PLAYERS],
        });
        Ok(())
    }

    /// Claim a player seat for a registration id. Seats are numbered 1..=4
    /// and each can be claimed once per session.
    pub fn register_player(&mut self, player: u32, registration_id: u32) -> Result<()> {
        if !(1..=NETPLAY_PLAYERS as u32).contains(&player) {
            return Err(HostError::invalid_argument(format!(
                "netplay player {player} outside 1..={NETPLAY_PLAYERS}"
            )));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| HostError::invalid_state("no netplay session is active"))?;

        let seat = &mut session.players[(player - 1) as usize];
        if seat.is_some() {
            return Err(HostError::invalid_argument(format!(
                "netplay player {player} is already registered"
            )));
        }
        *seat = Some(registration_id);
        debug!("netplay player {player} registered as {registration_id:#x}");
        Ok(())
    }

    /// Answer a front end's netplay version probe. Valid whether or not a
    /// session is active.
    pub fn version_check(&self, api_version: u32) -> Result<u32> {
        if !same_major(api_version, NETPLAY_API_VERSION) {
            return Err(HostError::Incompatible(format!(
                "front end targets netplay API {}, host provides {}",
                format_version(api_version),
                format_version(NETPLAY_API_VERSION)
            )));
        }
        Ok(NETPLAY_API_VERSION)
    }

    pub fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                info!("netplay session to {} closed", session.endpoint);
                Ok(())
            }
            None => Err(HostError::invalid_state("no netplay session is active")),
        }
    }
}
