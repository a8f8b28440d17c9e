pub mod in_process;
pub mod provider;
pub mod router;
pub mod subprocess;

pub use in_process::*;
pub use provider::*;
pub use router::*;
pub use subprocess::*;
