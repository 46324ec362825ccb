pub mod config;
pub mod rank;
pub mod status;

pub use config::StrataConfig;
pub use rank::{Rank, RankSet};
pub use status::Status;
