//! Executor Module
//!
//! The worker side of the runtime: runs task group attempts and serves the blocks they
//! commit to other executors.
//!
//! ## Architecture Overview
//! 1. **Launch**: the scheduler hands a `TaskGroupLaunch` to a `TaskGroupDispatcher`, which
//!    delivers it to the target `ExecutorRuntime`.
//! 2. **Execution**: the runtime looks up the stage's handler in the `TaskHandlerRegistry`
//!    and runs it with a `TaskContext` giving access to the attempt's inputs and output.
//! 3. **Commit**: output is hash partitioned into one block per sub-range and committed to
//!    the executor's block store, where the partition transport server exposes it.
//! 4. **Report**: `Running`, then `Completed` or `Failed`, go back on the launch's channel.
//!
//! ## Submodules
//! - **`runtime`**: one executor: block store, transport server and client, attempt tasks.
//! - **`dispatcher`**: in-process delivery of launches to runtimes.
//! - **`registry`**: maps handler names (e.g. "tokenize") to executable Rust code.
//! - **`context`**: what a handler sees of the attempt it is running.

pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod runtime;
