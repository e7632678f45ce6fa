//! Foreman master: applies configuration reloads to the live service
//! registry, runs builds against the committed services and serves the
//! control API.

pub mod builds;
pub mod loader;
pub mod master;
pub mod mq;
pub mod routes;

pub use builds::{BuildRecord, BuildResult, BuildRunner, BuildState, StepRecord};
pub use loader::{BuildConfig, ConfigLoader, FileConfigLoader, MasterSnapshot};
pub use master::MasterProcess;
pub use mq::{Consumer, Filter, Message, MessageBus};
