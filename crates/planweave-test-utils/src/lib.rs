//! Scripted capabilities, a fake code executor and plan fixtures.

pub mod backend;
pub mod code;
pub mod fixtures;

pub use backend::{Script, ScriptedBackend, ScriptedCapability};
pub use code::FakeCodeExecutor;
pub use fixtures::*;
