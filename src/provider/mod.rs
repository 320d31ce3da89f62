//! Providers the CLI can drive the engine with

pub mod outputs;
pub mod sandbox;

pub use sandbox::SandboxProvider;
