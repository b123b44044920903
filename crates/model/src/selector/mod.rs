//! The data selector object graph.
//!
//! A selector is deserialised fresh for every request, mutated by variable
//! substitution, compiled once and then dropped.

pub mod connection;
pub mod environment;
pub mod field;
pub mod scope;

use connection::Connection;
use field::Field;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub main: Connection,

    #[serde(default)]
    pub sort: Vec<SortField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,

    /// Default language for detail fields without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    /// Allows unauthenticated callers and skips environment scoping.
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering on a field of the main connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortField {
    pub field: Field,

    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(default)]
    pub offset: u64,
}

impl Selector {
    pub fn new(main: Connection) -> Self {
        Selector {
            main,
            ..Default::default()
        }
    }

    pub fn connection_count(&self) -> usize {
        let mut count = 0;
        self.main.walk(&mut |_| count += 1);
        count
    }
}
