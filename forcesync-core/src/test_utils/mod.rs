//! Test utilities and helpers for ForceSync
//!
//! In-memory transport, a scriptable fake sync service, force fixtures and
//! async timeout helpers shared by unit and integration tests.

pub mod async_helpers;
pub mod fake_server;
pub mod fixtures;
pub mod memory_connector;

pub use async_helpers::*;
pub use fake_server::{FakeServer, Responder};
pub use fixtures::*;
pub use memory_connector::MemoryConnector;
