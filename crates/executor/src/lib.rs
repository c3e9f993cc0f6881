//! Execution harness: wraps a factor snippet, runs it in its own Python
//! process under a wall-clock budget, and returns a typed result.

pub mod harness;
pub mod protocol;
pub mod wrapper;

use async_trait::async_trait;
use factorlab_core::{ExecutionResult, Fixture, Result};

/// Runs one snippet against one fixture.
///
/// Failures inside the snippet (exceptions, timeouts, garbled output) come
/// back as `Ok` with `success == false`. `Err` is reserved for the harness
/// itself being unable to run anything.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str, fixture: &Fixture) -> Result<ExecutionResult>;
}

pub use harness::PythonHarness;
pub use protocol::{parse_output, ParsedOutput};
pub use wrapper::{wrap_snippet, WrapOptions, ENTRY_POINT};
