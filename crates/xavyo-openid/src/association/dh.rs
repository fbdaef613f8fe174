//! Finite-field Diffie-Hellman for association key exchange
//!
//! Public values and moduli travel as base64 of their big-endian two's
//! complement ("btwoc") encoding. The MAC key is masked by XOR with the hash
//! of the btwoc-encoded shared secret.

use crate::message::SessionType;
use base64::{engine::general_purpose::STANDARD, Engine};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Default modulus every party knows without it being sent.
const DEFAULT_MODULUS: [u8; 128] = [
    0xdc, 0xf9, 0x3a, 0x0b, 0x88, 0x39, 0x72, 0xec, 0x0e, 0x19, 0x98, 0x9a,
    0xc5, 0xa2, 0xce, 0x31, 0x0e, 0x1d, 0x37, 0x71, 0x7e, 0x8d, 0x95, 0x71,
    0xbb, 0x76, 0x23, 0x73, 0x18, 0x66, 0xe6, 0x1e, 0xf7, 0x5a, 0x2e, 0x27,
    0x89, 0x8b, 0x05, 0x7f, 0x98, 0x91, 0xc2, 0xe2, 0x7a, 0x63, 0x9c, 0x3f,
    0x29, 0xb6, 0x08, 0x14, 0x58, 0x1c, 0xd3, 0xb2, 0xca, 0x39, 0x86, 0xd2,
    0x68, 0x37, 0x05, 0x57, 0x7d, 0x45, 0xc2, 0xe7, 0xe5, 0x2d, 0xc8, 0x1c,
    0x7a, 0x17, 0x18, 0x76, 0xe5, 0xce, 0xa7, 0x4b, 0x14, 0x48, 0xbf, 0xdf,
    0xaf, 0x18, 0x82, 0x8e, 0xfd, 0x25, 0x19, 0xf1, 0x4e, 0x45, 0xe3, 0x82,
    0x66, 0x34, 0xaf, 0x19, 0x49, 0xe5, 0xb5, 0x35, 0xcc, 0x82, 0x9a, 0x48,
    0x3b, 0x8a, 0x76, 0x22, 0x3e, 0x5d, 0x49, 0x0a, 0x25, 0x7f, 0x05, 0xbd,
    0xff, 0x16, 0xf2, 0xfb, 0x22, 0xc5, 0x83, 0xab,
];

const DEFAULT_GENERATOR: u32 = 2;

/// Errors from the key exchange
#[derive(Debug, Clone, Error)]
pub enum KeyExchangeError {
    #[error("Invalid key exchange encoding: {0}")]
    Encoding(String),

    #[error("{0}")]
    InvalidParameters(String),

    #[error("MAC key is {actual} bytes but the session hash yields {expected}")]
    SecretLength { expected: usize, actual: usize },
}

/// Group parameters (p, g).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameters {
    modulus: BigUint,
    generator: BigUint,
}

impl Default for DhParameters {
    fn default() -> Self {
        Self {
            modulus: BigUint::from_bytes_be(&DEFAULT_MODULUS),
            generator: BigUint::from(DEFAULT_GENERATOR),
        }
    }
}

impl DhParameters {
    /// Custom group parameters. The modulus must be odd and greater than 3,
    /// the generator strictly between 1 and p - 1.
    pub fn new(modulus: BigUint, generator: BigUint) -> Result<Self, KeyExchangeError> {
        let one = BigUint::from(1u32);
        if modulus <= BigUint::from(3u32) || !modulus.bit(0) {
            return Err(KeyExchangeError::InvalidParameters(
                "DH modulus must be an odd number greater than 3".to_string(),
            ));
        }
        if generator <= one || generator >= &modulus - &one {
            return Err(KeyExchangeError::InvalidParameters(
                "DH generator must lie strictly between 1 and p - 1".to_string(),
            ));
        }
        Ok(Self { modulus, generator })
    }

    /// Parameters from optional `dh_modulus` / `dh_gen` fields; absent fields use the defaults.
    pub fn from_fields(
        modulus: Option<&str>,
        generator: Option<&str>,
    ) -> Result<Self, KeyExchangeError> {
        if modulus.is_none() && generator.is_none() {
            return Ok(Self::default());
        }
        let defaults = Self::default();
        let modulus = modulus.map(decode_btwoc).transpose()?.unwrap_or(defaults.modulus);
        let generator = generator
            .map(decode_btwoc)
            .transpose()?
            .unwrap_or(defaults.generator);
        Self::new(modulus, generator)
    }

    #[must_use]
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    #[must_use]
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Generate a key pair with a private exponent uniform in [1, p - 2].
    #[must_use]
    pub fn generate_key_pair(&self) -> DhKeyPair {
        let mut bytes = Zeroizing::new(vec![0u8; self.modulus.to_bytes_be().len() + 8]);
        OsRng.fill_bytes(&mut bytes);
        let range = &self.modulus - BigUint::from(2u32);
        let private = BigUint::from_bytes_be(&bytes) % range + BigUint::from(1u32);
        let public = self.generator.modpow(&private, &self.modulus);
        DhKeyPair { private, public }
    }

    /// Reject public values that force a predictable shared secret.
    pub fn validate_public(&self, public: &BigUint) -> Result<(), KeyExchangeError> {
        let one = BigUint::from(1u32);
        if *public <= one || *public >= &self.modulus - &one {
            return Err(KeyExchangeError::InvalidParameters(
                "DH public value is degenerate (0, 1, p - 1 or out of range)".to_string(),
            ));
        }
        Ok(())
    }
}

/// One party's key pair.
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

impl DhKeyPair {
    #[must_use]
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Compute the shared secret with the other party's public value.
    pub fn shared_secret(
        &self,
        params: &DhParameters,
        other_public: &BigUint,
    ) -> Result<BigUint, KeyExchangeError> {
        params.validate_public(other_public)?;
        Ok(other_public.modpow(&self.private, params.modulus()))
    }
}

/// Big-endian two's complement encoding of a non-negative integer.
#[must_use]
pub fn btwoc(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    bytes
}

#[must_use]
pub fn encode_btwoc(value: &BigUint) -> String {
    STANDARD.encode(btwoc(value))
}

pub fn decode_btwoc(raw: &str) -> Result<BigUint, KeyExchangeError> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| KeyExchangeError::Encoding(e.to_string()))?;
    if bytes.is_empty() {
        return Err(KeyExchangeError::Encoding("empty integer".to_string()));
    }
    if bytes[0] & 0x80 != 0 {
        return Err(KeyExchangeError::Encoding("negative integer".to_string()));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

/// XOR `secret` with the session hash of the shared secret.
///
/// Masking and unmasking are the same operation.
pub fn xor_secret(
    session_type: SessionType,
    shared: &BigUint,
    secret: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyExchangeError> {
    let encoded = Zeroizing::new(btwoc(shared));
    let mask: Zeroizing<Vec<u8>> = Zeroizing::new(match session_type {
        SessionType::DhSha1 => Sha1::digest(&*encoded).to_vec(),
        SessionType::DhSha256 => Sha256::digest(&*encoded).to_vec(),
        SessionType::NoEncryption => {
            return Err(KeyExchangeError::InvalidParameters(
                "no-encryption sessions have no key exchange".to_string(),
            ));
        }
    });
    if mask.len() != secret.len() {
        return Err(KeyExchangeError::SecretLength {
            expected: mask.len(),
            actual: secret.len(),
        });
    }
    Ok(Zeroizing::new(
        mask.iter().zip(secret).map(|(m, s)| m ^ s).collect(),
    ))
}
