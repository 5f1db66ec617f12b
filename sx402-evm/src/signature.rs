//! Signer recovery for EIP-3009 authorizations.
//!
//! Only plain 65-byte `r || s || v` EOA signatures are accepted. A signature
//! whose `s` lies in the upper half of the curve order is rejected rather
//! than normalized, matching what `ecrecover`-based token contracts accept.

use alloy_primitives::{Address, B256, Signature};

/// Why a signature could not be attributed to a signer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The signature is not exactly 65 bytes.
    #[error("signature must be 65 bytes, got {0}")]
    InvalidLength(usize),
    /// The bytes do not parse as `r || s || v`.
    #[error("malformed signature")]
    Malformed,
    /// `s` is in the upper half of the curve order.
    #[error("signature s value is not canonical (high-s)")]
    HighS,
    /// Public key recovery failed.
    #[error("signer recovery failed")]
    Unrecoverable,
    /// The recovered signer is not the expected one.
    #[error("signature recovers to {recovered}, expected {expected}")]
    WrongSigner {
        /// Address the signature actually recovers to.
        recovered: Address,
        /// Address that should have signed.
        expected: Address,
    },
}

/// Parses a 65-byte signature, rejecting high-s values.
///
/// # Errors
///
/// Returns [`SignatureError`] when the signature has the wrong length,
/// cannot be parsed, or is not low-s.
pub fn parse_signature(bytes: &[u8]) -> Result<Signature, SignatureError> {
    if bytes.len() != 65 {
        return Err(SignatureError::InvalidLength(bytes.len()));
    }
    let signature = Signature::from_raw(bytes).map_err(|_| SignatureError::Malformed)?;
    if signature.normalize_s().is_some() {
        return Err(SignatureError::HighS);
    }
    Ok(signature)
}

/// Recovers the signer of `prehash` and checks it equals `expected`.
///
/// # Errors
///
/// Returns [`SignatureError`] when parsing or recovery fails, or when the
/// recovered address differs from `expected`.
pub fn verify_signer(bytes: &[u8], prehash: &B256, expected: Address) -> Result<Signature, SignatureError> {
    let signature = parse_signature(bytes)?;
    let recovered = signature
        .recover_address_from_prehash(prehash)
        .map_err(|_| SignatureError::Unrecoverable)?;
    if recovered != expected {
        return Err(SignatureError::WrongSigner {
            recovered,
            expected,
        });
    }
    Ok(signature)
}

/// Splits a signature into the `(v, r, s)` triple `transferWithAuthorization` takes.
#[must_use]
pub fn split_vrs(signature: &Signature) -> (u8, B256, B256) {
    let v = 27 + u8::from(signature.v());
    (v, signature.r().into(), signature.s().into())
}
