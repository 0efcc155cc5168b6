pub mod batch;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fetch;
pub mod output;
pub mod pair;
pub mod protocol;
pub mod record;
pub mod reference;
pub mod ticket;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::HtsgetProtocol;
