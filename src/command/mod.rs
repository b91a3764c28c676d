//! Command Module
//!
//! Parses client request lines into typed commands and dispatches them to
//! the storage engine, enforcing the read-only policy on replica nodes.

mod handler;
mod parser;

pub use handler::{Handler, HELP_TEXT, RESPONSE_OK};
pub use parser::{parse, Command};
