//! Configuration management
//!
//! Node, network and consensus settings loaded from TOML with environment
//! overrides.

pub mod consensus;
pub mod settings;

pub use consensus::{ConsensusParams, GENESIS_TIMESTAMP};
pub use settings::{NetworkSettings, NodeSettings, Settings};
