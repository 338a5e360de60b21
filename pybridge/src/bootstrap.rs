//! The program the interpreter runs as its entire execution.
//!
//! It reads length-prefixed JSON commands from stdin, dispatches them against
//! an in-memory name table and writes exactly one response frame per command.
//! Dispatch failures become `error` responses; EOF on stdin or a `shutdown`
//! command ends the loop.

/// Bootstrap source passed after `-c`.
pub const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Name under which the name table is bound to itself.
pub const TABLE_NAME: &str = "_";

/// Flag selecting "execute the following inline script".
pub const INLINE_FLAG: &str = "-c";

/// Startup arguments that make the bootstrap the child's whole program.
pub fn startup_args() -> [&'static str; 2] {
    [INLINE_FLAG, BOOTSTRAP]
}
