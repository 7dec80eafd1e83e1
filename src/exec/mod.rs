//! External command execution
//!
//! Every cluster and cloud operation in zonechaos is an invocation of an
//! external CLI (`kubectl`, `az`, `helm`). This module owns how those
//! processes are spawned so the rest of the crate can be tested against a
//! mocked [`CommandRunner`].

mod runner;

pub use runner::{ensure_tool, CommandOutput, CommandRunner, Invocation, ProcessRunner};

#[cfg(test)]
pub use runner::MockCommandRunner;
