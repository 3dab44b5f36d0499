//! Long-lived session state shared by every handshake.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    config::Config,
    crypto::{Opaque, TicketCipher},
};

/// Configuration plus the per-process camouflage material.
///
/// A `SessionState` is created once at startup and then only read. Wrap it
/// in an [`Arc`] and hand the same value to every connection; distinct
/// values can coexist in one process, which keeps tests independent.
///
/// [`Arc`]: std::sync::Arc
#[derive(Debug)]
pub struct SessionState {
    config: Config,
    opaque: Opaque,
    ticket_cipher: TicketCipher,
    clock: fn() -> SystemTime,
}

impl SessionState {
    /// Creates the state with a fresh opaque token and the system clock.
    pub fn new(config: Config) -> Self {
        Self::with_opaque_and_clock(config, Opaque::from_entropy(), SystemTime::now)
    }

    /// Creates the state with a chosen opaque token and clock.
    ///
    /// **Warning**: a fixed opaque token makes every process present the
    /// same session tickets. Use [`new`](SessionState::new) outside tests.
    pub fn with_opaque_and_clock(
        config: Config,
        opaque: Opaque,
        clock: fn() -> SystemTime,
    ) -> Self {
        let ticket_cipher = TicketCipher::with_shared_key(&config.shared_key);
        Self {
            config,
            opaque,
            ticket_cipher,
            clock,
        }
    }

    /// The configuration this state was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The per-process opaque token.
    pub fn opaque(&self) -> &Opaque {
        &self.opaque
    }

    /// Current wall-clock time.
    pub fn now(&self) -> SystemTime {
        (self.clock)()
    }

    /// Current time in whole seconds since the Unix epoch, saturating at 0.
    pub fn unix_time(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    pub(crate) fn ticket_cipher(&self) -> &TicketCipher {
        &self.ticket_cipher
    }
}
