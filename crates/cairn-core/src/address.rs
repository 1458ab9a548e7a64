//! Account addresses.
//!
//! Owners are identified on chain by a 32-byte public key rendered as an
//! SS58 string:
//!
//!   base58( prefix || public_key || checksum )
//!
//! where `prefix` is one byte for network identifiers below 64 and two bytes
//! up to 16383, and `checksum` is the first two bytes of
//! BLAKE2b-512("SS58PRE" || prefix || public_key).

use std::fmt;
use std::str::FromStr;

use blake2::{Blake2b512, Digest};
use thiserror::Error;

const CHECKSUM_PREAMBLE: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;
const KEY_LEN: usize = 32;

/// Largest network identifier expressible in the two-byte prefix form.
pub const MAX_NETWORK_PREFIX: u16 = 16_383;

/// A decoded account: network prefix plus the public key it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId {
    prefix: u16,
    public: [u8; KEY_LEN],
}

impl AccountId {
    pub fn new(prefix: u16, public: [u8; KEY_LEN]) -> Result<Self, AddressParseError> {
        if prefix > MAX_NETWORK_PREFIX {
            return Err(AddressParseError::PrefixOutOfRange(prefix));
        }
        Ok(Self { prefix, public })
    }

    /// Decode an SS58 address string.
    pub fn parse(address: &str) -> Result<Self, AddressParseError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AddressParseError::Empty);
        }

        let data = bs58::decode(address).into_vec()?;
        let (prefix, prefix_len) = decode_prefix(&data)?;

        let expected = prefix_len + KEY_LEN + CHECKSUM_LEN;
        if data.len() != expected {
            return Err(AddressParseError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }

        let (body, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
        if ss58_checksum(body)[..CHECKSUM_LEN] != *checksum {
            return Err(AddressParseError::ChecksumMismatch);
        }

        let mut public = [0u8; KEY_LEN];
        public.copy_from_slice(&body[prefix_len..]);
        Ok(Self { prefix, public })
    }

    /// Network identifier the address was encoded for.
    pub fn prefix(&self) -> u16 {
        self.prefix
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    /// Encode back to an SS58 string.
    pub fn to_ss58(&self) -> String {
        let mut body = encode_prefix(self.prefix);
        body.extend_from_slice(&self.public);
        let checksum = ss58_checksum(&body);
        body.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        bs58::encode(body).into_string()
    }
}

impl FromStr for AccountId {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ss58())
    }
}

fn ss58_checksum(body: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREAMBLE);
    hasher.update(body);
    hasher.finalize().into()
}

fn decode_prefix(data: &[u8]) -> Result<(u16, usize), AddressParseError> {
    match data {
        [] => Err(AddressParseError::InvalidLength {
            expected: 1 + KEY_LEN + CHECKSUM_LEN,
            actual: 0,
        }),
        [first, ..] if *first < 64 => Ok((u16::from(*first), 1)),
        [first, second, ..] if *first < 128 => {
            // Six bits from each byte, low byte first.
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            Ok((u16::from(lower) | (u16::from(upper) << 8), 2))
        }
        [first, ..] => Err(AddressParseError::UnsupportedPrefix(*first)),
    }
}

fn encode_prefix(prefix: u16) -> Vec<u8> {
    if prefix < 64 {
        vec![prefix as u8]
    } else {
        let first = ((prefix & 0b0000_0000_1111_1100) as u8) >> 2;
        let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
        vec![first | 0b0100_0000, second]
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,
    #[error("address is not valid base58: {0}")]
    Base58(#[from] bs58::decode::Error),
    #[error("address decodes to {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unsupported address prefix byte {0:#04x}")]
    UnsupportedPrefix(u8),
    #[error("network prefix {0} exceeds {MAX_NETWORK_PREFIX}")]
    PrefixOutOfRange(u16),
    #[error("address checksum mismatch")]
    ChecksumMismatch,
}
