//! Recipient encryption for unseal shares.
//!
//! When a seal configuration names recipients, each generated share is
//! hex-encoded and then encrypted to the matching recipient (age X25519).
//! The wrapped share replaces the plaintext share in the init result; the
//! system keeps no copy of the unwrapped material after this step. Wrapped
//! shares are opaque to Coffer from then on — decryption happens out of band
//! with the recipient's identity file.

use age::x25519::Recipient;
use zeroize::Zeroize;

use crate::error::WrapError;

/// Parse the configured recipient keys.
///
/// # Errors
///
/// Returns [`WrapError::InvalidRecipient`] naming the index of the first key
/// that fails to parse.
pub fn parse_recipients(keys: &[String]) -> Result<Vec<Recipient>, WrapError> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            key.trim()
                .parse::<Recipient>()
                .map_err(|e| WrapError::InvalidRecipient {
                    index,
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Hex-encode each share and encrypt it to the recipient at the same index.
///
/// `shares` and `recipients` must be the same length — the seal configuration
/// invariant (`recipients` empty or equal to `secret_shares`) guarantees this
/// by the time shares exist. The plaintext hex buffers are zeroized before
/// returning.
///
/// # Errors
///
/// Returns [`WrapError::Encrypt`] if recipient encryption fails.
pub fn wrap_shares(
    shares: &[Vec<u8>],
    recipients: &[Recipient],
) -> Result<Vec<Vec<u8>>, WrapError> {
    debug_assert_eq!(shares.len(), recipients.len());

    let mut wrapped = Vec::with_capacity(shares.len());
    for (share, recipient) in shares.iter().zip(recipients) {
        let mut hex_share = hex::encode(share).into_bytes();
        let result = age::encrypt(recipient, &hex_share);
        hex_share.zeroize();
        let ciphertext = result.map_err(|e| WrapError::Encrypt {
            reason: e.to_string(),
        })?;
        wrapped.push(ciphertext);
    }
    Ok(wrapped)
}
