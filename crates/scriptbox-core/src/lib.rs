#![forbid(unsafe_code)]
//! scriptbox-core: column types, the in-memory table scripts work on, the
//! wire format, and the Table/Wire serializer.
//!
//! Nothing here knows about the script language or the host; both sides
//! depend on this crate.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod serialize;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
