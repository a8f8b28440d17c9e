pub mod agent;
pub mod breaker;
pub mod conversation;
pub mod error;
pub mod events;
pub mod stream;
pub mod task;

pub use agent::*;
pub use breaker::*;
pub use conversation::*;
pub use error::*;
pub use events::*;
pub use stream::*;
pub use task::*;
