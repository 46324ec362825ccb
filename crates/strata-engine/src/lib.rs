//! strata-engine — handles for the storage engines managed by this node.
//!
//! The [`Engine`] trait is the narrow seam the rest of the control plane
//! programs against: readiness, rank, target count and one local RPC
//! entry point. [`LocalEngine`] talks to a real engine over its Unix
//! socket; [`MockEngine`] is a scripted double for tests.
//!
//! The message types for every local RPC live in [`rpc`].

pub mod engine;
pub mod error;
pub mod local;
pub mod mock;
pub mod rpc;

pub use engine::{Engine, EngineSet, invoke};
pub use error::{EngineError, EngineResult};
pub use local::LocalEngine;
pub use mock::MockEngine;
pub use rpc::{HasStatus, Method};
