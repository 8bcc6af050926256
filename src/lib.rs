pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod notify;
pub mod store;
pub mod transfer;
pub mod util;

pub use error::{BatchError, ConfigError, StoreError, TransferError};
