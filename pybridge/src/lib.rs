//! pybridge: drive a long-lived Python interpreter subprocess.
//!
//! The host starts an interpreter whose whole program is a small bootstrap
//! loop, then executes scripts and reads or writes variables in the
//! interpreter's name table through length-prefixed JSON frames on the
//! child's stdin/stdout.
//!
//! ```no_run
//! # async fn demo() -> pybridge::Result<()> {
//! let mut py = pybridge::Interp::new()?;
//! py.start()?;
//! py.set("xs", &[1, 2, 3]).await?;
//! let out = py.run("print(sum(xs))").await?;
//! assert_eq!(out, "6\n");
//! py.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod bootstrap;
pub mod bridge;
pub mod config;
mod error;
pub mod interp;
pub mod supervisor;

pub use bootstrap::TABLE_NAME;
pub use bridge::protocol::{Command, Response};
pub use config::{InterpConfig, LEGACY_READ_SIZE};
pub use error::{BridgeError, Result, StepError};
pub use interp::{Interp, InterpBuilder};
pub use supervisor::{ConfigStep, ProcessSpec, StdioMode, with_args, with_env, with_path};
