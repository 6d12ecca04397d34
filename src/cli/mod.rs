// CLI module
// Interactive tester for trained adapters

mod commands;
mod repl;

pub use commands::Command;
pub use repl::{Reply, Tester};
