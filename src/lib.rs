pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod signal;
pub mod store;
pub mod transfer;
pub mod util;

pub use error::{CopyError, PartFailure};
pub use store::{ObjectStore, StoreError};
