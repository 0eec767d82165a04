//! Convenient re-exports for downstream crates.

pub use crate::config::{split_list, SandboxConfig, DEFAULT_MODULES};
pub use crate::error::{Error, Result};
pub use crate::hash::{hash_str, Hash256};
pub use crate::id::{DataSourceId, DataSourceRef, QueryId, RunId};
pub use crate::schema::{ColumnDescriptor, ColumnType, DataType, SchemaTable, SourceSchema};
pub use crate::serialize::{from_wire, to_wire};
pub use crate::types::{Aggregation, Column, Interval, Period, PeriodFreq, Scalar, Table};
pub use crate::wire::{Record, WireResult, WireTable};
