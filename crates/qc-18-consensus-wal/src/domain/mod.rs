//! # Domain Layer
//!
//! Event model, codec, block identity rules, configuration and errors.
//! Nothing here touches the filesystem.

pub mod block_identity;
pub mod codec;
pub mod config;
pub mod entities;
pub mod errors;
pub mod metrics;
