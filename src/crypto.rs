//! Key material and camouflage fields.
//!
//! This module derives the shared key from the configured password and
//! produces the two keyed fields of the disguised ClientHello: the
//! authenticated random field and the sealed session ticket.

use core::fmt::{Debug, Formatter};

use aws_lc_rs::aead::{AES_128_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use blake3::Hasher;
use rand::{TryRngCore, rngs::OsRng};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::specification::{
    RANDOM_LEN, RANDOM_NONCE_LEN, TICKET_LEN, TICKET_NONCE_LEN, TICKET_PLAINTEXT_LEN,
    TICKET_TAG_LEN,
};

/// A 256-bit key shared between the client and the remote server.
///
/// It is derived from the `Key` plugin option with [`derive_from_password`],
/// and must be present before any handshake can be composed.
///
/// [`derive_from_password`]: SharedKey::derive_from_password
#[derive(Clone, Eq, PartialEq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derives a key from a password shared out-of-band with the server.
    pub fn derive_from_password(password: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(password.as_bytes());
        hasher.update(b"quietwire shared key from password");
        Self(*hasher.finalize().as_bytes())
    }

    /// Extract this key’s bytes for serialization.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get a reference to the key’s bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for SharedKey {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl Debug for SharedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedKey").field(&"*****").finish()
    }
}

/// A per-process 256-bit unsigned integer, stored big-endian.
///
/// The opaque token is not secret. It is generated once when the process
/// starts and sealed into every session ticket, so that all connections of
/// one process present the same ticket within a ticket window, the way a
/// browser resumes a session.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Opaque([u8; 32]);

impl Opaque {
    /// Generate a new [`Opaque`] token from system entropy.
    pub fn from_entropy() -> Self {
        let mut value = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut value)
            .expect("system random source failure");
        Self(value)
    }

    /// Builds the token from its big-endian representation.
    pub fn from_be_bytes(value: [u8; 32]) -> Self {
        Self(value)
    }

    /// Returns the big-endian representation of the token.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// Builds the 32-byte ClientHello random field.
///
/// The first half is a fresh nonce, the second half authenticates the nonce
/// and the current time window under the shared key.
pub(crate) fn random_field(
    key: &SharedKey,
    window: u64,
    nonce: [u8; RANDOM_NONCE_LEN],
) -> [u8; RANDOM_LEN] {
    let mut hasher = Hasher::new_keyed(key.as_bytes());
    hasher.update(b"quietwire client hello random");
    hasher.update(&window.to_be_bytes());
    hasher.update(&nonce);

    let mut random = [0u8; RANDOM_LEN];
    random[..RANDOM_NONCE_LEN].copy_from_slice(&nonce);
    random[RANDOM_NONCE_LEN..]
        .copy_from_slice(&hasher.finalize().as_bytes()[..RANDOM_LEN - RANDOM_NONCE_LEN]);
    random
}

/// Seals the opaque token into session tickets with AES-128-GCM.
#[derive(Debug)]
pub(crate) struct TicketCipher {
    key: LessSafeKey,
    nonce_key: SharedKey,
}

impl TicketCipher {
    pub(crate) fn with_shared_key(shared_key: &SharedKey) -> Self {
        let key = UnboundKey::new(&AES_128_GCM, &shared_key.as_bytes()[..16])
            .expect("AES-128-GCM accepts a 16-byte key");
        let mut hasher = Hasher::new();
        hasher.update(shared_key.as_ref());
        hasher.update(b"quietwire session ticket nonce key");
        Self {
            key: LessSafeKey::new(key),
            nonce_key: SharedKey::from(*hasher.finalize().as_bytes()),
        }
    }

    /// Produces the ticket for `opaque` in ticket window `window`.
    ///
    /// The output is a pure function of its inputs: the same process sends
    /// the same ticket until the window rolls over.
    pub(crate) fn seal(&self, opaque: &Opaque, window: u64) -> [u8; TICKET_LEN] {
        let nonce = self.nonce_for(opaque, window);

        let mut ticket = [0u8; TICKET_LEN];
        ticket[..TICKET_NONCE_LEN].copy_from_slice(&nonce);
        let (body, tag) = ticket[TICKET_NONCE_LEN..].split_at_mut(TICKET_PLAINTEXT_LEN);
        body[..32].copy_from_slice(&opaque.to_be_bytes());
        body[32..40].copy_from_slice(&window.to_be_bytes());

        let t = self
            .key
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), body)
            .expect("encrypt failed, this should never happen");
        debug_assert_eq!(t.as_ref().len(), TICKET_TAG_LEN);
        tag.copy_from_slice(t.as_ref());
        ticket
    }

    fn nonce_for(&self, opaque: &Opaque, window: u64) -> [u8; TICKET_NONCE_LEN] {
        let mut hasher = Hasher::new_keyed(self.nonce_key.as_bytes());
        hasher.update(&opaque.to_be_bytes());
        hasher.update(&window.to_be_bytes());
        let mut nonce = [0u8; TICKET_NONCE_LEN];
        nonce.copy_from_slice(&hasher.finalize().as_bytes()[..TICKET_NONCE_LEN]);
        nonce
    }
}
