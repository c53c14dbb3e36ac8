pub mod aggs;
pub mod cluster;
pub mod config;
pub mod dialect;
pub mod domain;
pub mod error;
pub mod expr;
pub mod matrix;
pub mod metadata;
pub mod query;
pub mod runtime;
pub mod validation;

pub use crate::cluster::Cluster;
#[cfg(feature = "http")]
pub use crate::cluster::HttpCluster;
pub use crate::config::JxConfig;
pub use crate::error::{JxError, Result};
pub use crate::metadata::{Column, ColumnStore};
pub use crate::query::{Aggregate, Edge, FormatKind, Query, Select};
pub use crate::runtime::run_query;
