#![forbid(unsafe_code)]
//! scriptbox-exec: runs untrusted scripts and hands back a wire result or an
//! error string.
//!
//! `Sandbox` drives a run: compile with the restriction checker, build a
//! fresh namespace (host accessors, pre-bound modules, `result`), interpret
//! on a sized thread, serialize `result`, attach the captured log. Hosts plug
//! in through the traits in `host`.

pub mod accessors;
pub mod diagnostics;
pub mod host;
pub mod record;
pub mod sandbox;

pub use diagnostics::Diagnostic;
pub use host::{
    DataSourceRegistry, HostServices, Identity, InMemoryHost, QueryRunner, QueryStore, StaticSource,
    StoreError,
};
pub use record::{Outcome, RunRecord};
pub use sandbox::{RunState, Sandbox, SandboxError};

/// Engine version recorded in every `RunRecord`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
