pub mod budget;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod stores;

pub use budget::*;
pub use cancellation::*;
pub use config::*;
pub use error::*;
pub use event_bus::*;
pub use stores::*;
