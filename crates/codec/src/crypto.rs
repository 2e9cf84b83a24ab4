//! Crypto envelope: token boxes, AEAD packet headers, signatures.
//!
//! Route and continue tokens are sealed with `crypto_box_easy`: a 24-byte
//! nonce generated by the sender, followed by a Curve25519/XSalsa20-Poly1305
//! box addressed using the *known* long-term public keys of both sides (the
//! router's key and this relay's key, both already configured out of band)
//! rather than an ephemeral key pair -- there is no anonymous-sender case
//! here, every token's sender is the router. That keeps a sealed token at
//! exactly `nonce(24) + plaintext + mac(16)` bytes, matching the 116/57-byte
//! route/continue token sizes in spec.md §6. Packet headers use a direct
//! ChaCha20-Poly1305 AEAD over an empty plaintext -- the header exists
//! purely to authenticate the packet metadata carried as AAD, not to
//! encrypt anything.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key as AeadKey, Nonce as AeadNonce};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};

use crate::{Error, Result};

pub const HEADER_TAG_BYTES: usize = 16;
/// `nonce(24) + mac(16)`, the fixed overhead a token box adds on top of
/// its cleartext -- a route token is therefore `76 + 40 = 116` bytes
/// sealed, a continue token `17 + 40 = 57`, matching spec.md §6.
pub const TOKEN_BOX_OVERHEAD: usize = 24 + 16;

/// Open a token sealed with [`seal_token_box`]: a 24-byte nonce followed
/// by a `crypto_box_easy` ciphertext between `sender`'s long-term public
/// key and `recipient`'s long-term secret key.
pub fn open_token_box(sealed: &[u8], sender: &PublicKey, recipient: &SecretKey) -> Result<Vec<u8>> {
    if sealed.len() < TOKEN_BOX_OVERHEAD {
        return Err(Error::DecryptFailed);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(24);
    let nonce: [u8; 24] = nonce_bytes.try_into().map_err(|_| Error::DecryptFailed)?;

    let sbox = SalsaBox::new(sender, recipient);
    sbox.decrypt(&nonce.into(), ciphertext)
        .map_err(|_| Error::DecryptFailed)
}

/// Seal `plaintext` from `sender` to `recipient` using a fresh random
/// nonce. Used by tests and by any component that issues tokens directly;
/// in production tokens are issued by the router, not this relay.
pub fn seal_token_box<R: RngCore + CryptoRng>(
    rng: &mut R,
    plaintext: &[u8],
    sender: &SecretKey,
    recipient: &PublicKey,
) -> Vec<u8> {
    let mut nonce = [0u8; 24];
    rng.fill_bytes(&mut nonce);

    let sbox = SalsaBox::new(recipient, sender);
    let ciphertext = sbox
        .encrypt(&nonce.into(), plaintext)
        .expect("sealing a bounded plaintext cannot fail");

    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Build the 12-byte AEAD nonce for a header: packet type (LE u32)
/// followed by the sequence number (LE u64).
fn header_nonce(packet_type: u8, sequence: u64) -> AeadNonce {
    let mut nonce = [0u8; 12];
    nonce[0..4].copy_from_slice(&(packet_type as u32).to_le_bytes());
    nonce[4..12].copy_from_slice(&sequence.to_le_bytes());
    nonce.into()
}

/// AAD bound into every header: session id followed by session version.
fn header_aad(session_id: u64, session_version: u8) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[0..8].copy_from_slice(&session_id.to_le_bytes());
    aad[8] = session_version;
    aad
}

/// Produce the 16-byte authentication tag for a packet header. There is no
/// ciphertext: the header authenticates its own fields (session id,
/// version, sequence, packet type) without encrypting anything.
pub fn seal_header(
    session_private_key: &[u8; 32],
    packet_type: u8,
    sequence: u64,
    session_id: u64,
    session_version: u8,
) -> [u8; HEADER_TAG_BYTES] {
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(session_private_key));
    let nonce = header_nonce(packet_type, sequence);
    let aad = header_aad(session_id, session_version);

    let sealed = cipher
        .encrypt(&nonce, Payload { msg: &[], aad: &aad })
        .expect("sealing an empty payload cannot fail");

    let mut tag = [0u8; HEADER_TAG_BYTES];
    tag.copy_from_slice(&sealed);
    tag
}

/// Verify a packet header's authentication tag in constant time via the
/// AEAD decrypt path (which itself compares tags in constant time).
pub fn verify_header(
    session_private_key: &[u8; 32],
    packet_type: u8,
    sequence: u64,
    session_id: u64,
    session_version: u8,
    tag: &[u8; HEADER_TAG_BYTES],
) -> Result<()> {
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(session_private_key));
    let nonce = header_nonce(packet_type, sequence);
    let aad = header_aad(session_id, session_version);

    cipher
        .decrypt(&nonce, Payload { msg: tag, aad: &aad })
        .map(|_| ())
        .map_err(|_| Error::VerifyFailed)
}

/// X25519 Diffie-Hellman, used to derive the per-peer shared secret that
/// authenticates relay-to-relay mesh pings: there is no session between
/// two relays, just a standing link, so both sides derive the same key
/// from their own secret and the other's long-term public key rather
/// than negotiating one out of band.
pub fn diffie_hellman(secret: &[u8; 32], peer_public: &[u8; 32]) -> [u8; 32] {
    let secret = x25519_dalek::StaticSecret::from(*secret);
    let peer_public = x25519_dalek::PublicKey::from(*peer_public);
    secret.diffie_hellman(&peer_public).to_bytes()
}

/// Verify an Ed25519 signature over `message`, as used for router-signed
/// peer lists and relay-signed pings.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|_| Error::VerifyFailed)?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::VerifyFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn token_box_round_trips() {
        let mut rng = OsRng;
        let sender_secret = SecretKey::generate(&mut rng);
        let sender_public = sender_secret.public_key();
        let recipient_secret = SecretKey::generate(&mut rng);
        let recipient_public = recipient_secret.public_key();

        let plaintext = b"route token cleartext goes here";
        let sealed = seal_token_box(&mut rng, plaintext, &sender_secret, &recipient_public);
        assert_eq!(sealed.len(), TOKEN_BOX_OVERHEAD + plaintext.len());

        let opened = open_token_box(&sealed, &sender_public, &recipient_secret).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn token_box_rejects_wrong_recipient() {
        let mut rng = OsRng;
        let sender_secret = SecretKey::generate(&mut rng);
        let sender_public = sender_secret.public_key();
        let recipient_public = SecretKey::generate(&mut rng).public_key();
        let wrong_secret = SecretKey::generate(&mut rng);

        let sealed = seal_token_box(&mut rng, b"hello", &sender_secret, &recipient_public);
        assert!(open_token_box(&sealed, &sender_public, &wrong_secret).is_err());
    }

    #[test]
    fn token_box_rejects_wrong_sender() {
        let mut rng = OsRng;
        let sender_secret = SecretKey::generate(&mut rng);
        let wrong_sender_public = SecretKey::generate(&mut rng).public_key();
        let recipient_secret = SecretKey::generate(&mut rng);
        let recipient_public = recipient_secret.public_key();

        let sealed = seal_token_box(&mut rng, b"hello", &sender_secret, &recipient_public);
        assert!(open_token_box(&sealed, &wrong_sender_public, &recipient_secret).is_err());
    }

    #[test]
    fn header_tag_round_trips() {
        let key = [7u8; 32];
        let tag = seal_header(&key, 9, 42, 0x1122_3344_5566_7788, 3);
        verify_header(&key, 9, 42, 0x1122_3344_5566_7788, 3, &tag).unwrap();
    }

    #[test]
    fn header_tag_rejects_tampered_sequence() {
        let key = [7u8; 32];
        let tag = seal_header(&key, 9, 42, 0x1122_3344_5566_7788, 3);
        assert!(verify_header(&key, 9, 43, 0x1122_3344_5566_7788, 3, &tag).is_err());
    }

    #[test]
    fn diffie_hellman_is_symmetric() {
        let mut rng = OsRng;
        let a = SecretKey::generate(&mut rng);
        let b = SecretKey::generate(&mut rng);

        let shared_ab = diffie_hellman(a.to_bytes().as_ref().try_into().unwrap(), b.public_key().as_bytes());
        let shared_ba = diffie_hellman(b.to_bytes().as_ref().try_into().unwrap(), a.public_key().as_bytes());

        assert_eq!(shared_ab, shared_ba);
    }

    #[test]
    fn ed25519_signature_round_trips() {
        let mut csprng = OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();

        let message = b"peer list update";
        let signature: Signature = {
            use ed25519_dalek::Signer;
            signing_key.sign(message)
        };

        verify_signature(
            verifying_key.as_bytes(),
            message,
            &signature.to_bytes(),
        )
        .unwrap();
    }
}
