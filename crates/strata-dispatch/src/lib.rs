//! strata-dispatch — talking to many engines at once.
//!
//! - [`Dispatcher`] fans one local RPC out to every (or a rank-filtered
//!   subset of) engine and returns rank-ordered results.
//! - [`resolve`] maps administrator device identifiers to owning engines.
//! - [`SmdService`] runs SMD inventory queries and device management on
//!   top of both.

pub mod device;
pub mod error;
pub mod fanout;
pub mod resolver;
pub mod retry;
pub mod smd;

pub use device::{DeviceId, PciAddress};
pub use error::{DispatchError, DispatchResult};
pub use fanout::{Dispatcher, RankResult, Targets, Unready};
pub use resolver::{EngineDevices, resolve};
pub use retry::RetryPolicy;
pub use smd::{DeviceResult, RankManageResult, RankSmdInfo, SmdManageOp, SmdQueryReq, SmdService};
