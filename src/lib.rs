pub mod config;
pub mod error;
pub mod provision;
pub mod smoke;
pub mod tls;

pub mod kafka;
pub mod secrets;

pub use config::Config;
pub use error::{Error, Result};
pub use tls::{TlsContext, TlsPaths};
