//! Local multi-language snippet execution.
//!
//! [`Detector`] reports which registered toolchains resolve in the user's
//! login shell; [`Engine`] materializes a snippet in the scratch directory,
//! runs its compile/run pipeline under a timeout and always removes what it
//! wrote.

pub mod detector;
pub mod engine;
pub mod error;
pub mod scratch;
pub mod shell;


pub use detector::Detector;
pub use engine::Engine;
pub use error::{DetectError, ExecutionError};
pub use scratch::{ScratchDir, ScratchLease};
pub use shell::LoginShell;
