//! cairn-core: shared types for the Cairn storage client, covering
//! configuration, account addresses and cryptographic primitives.
//! All other Cairn crates depend on this one.

pub mod address;
pub mod client;
pub mod config;
pub mod crypto;

pub use address::{AccountId, AddressParseError};
pub use client::{ClientConfig, ConfigurationError, Role};
pub use config::{CairnConfig, Policy};
