pub mod breaker;
pub mod classifier;
pub mod recovery;
pub mod session_recovery;

pub use breaker::*;
pub use classifier::*;
pub use recovery::*;
pub use session_recovery::*;
