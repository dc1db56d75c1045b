//! Source document handling: splitting into ordered records and grouping
//! records into slide-sized buckets.

pub mod distributor;
pub mod loader;

use serde::{Deserialize, Serialize};

/// One page (PDF) or section (text) of the source, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub number: usize,
    pub title: String,
    pub body: String,
}
