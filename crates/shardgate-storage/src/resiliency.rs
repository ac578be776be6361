//! Resiliency math: derived guarantees of a replication or erasure-coding scheme.
//!
//! Malformed descriptors (negative counts) are clamped to zero rather than
//! rejected, so a bad configuration degrades to "no redundancy".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::placement::NodeCount;

/// Redundancy scheme as configured on a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResiliencyDescriptor {
    /// Full copies of every chunk.
    #[serde(rename_all = "camelCase")]
    Replication {
        /// Total number of copies, including the first.
        replicas: i64,
    },
    /// Data fragments plus parity fragments.
    #[serde(rename_all = "camelCase")]
    ErasureCoding {
        /// Number of data fragments.
        data_frags: i64,
        /// Number of parity fragments.
        parity_frags: i64,
    },
}

impl ResiliencyDescriptor {
    /// Three-way replication.
    pub fn replication_3() -> Self {
        Self::Replication { replicas: 3 }
    }

    /// 4+2 erasure coding.
    pub fn ec_4_2() -> Self {
        Self::ErasureCoding {
            data_frags: 4,
            parity_frags: 2,
        }
    }
}

/// Relative cost of rebuilding lost data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebuildEffort {
    /// Copy a surviving replica.
    Low,
    /// Decode from a narrow stripe.
    High,
    /// Decode from a wide stripe (more than four data fragments).
    VeryHigh,
}

/// Resiliency family, without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResiliencyType {
    /// See [`ResiliencyDescriptor::Replication`].
    Replication,
    /// See [`ResiliencyDescriptor::ErasureCoding`].
    ErasureCoding,
}

impl ResiliencyType {
    /// What one redundant unit is called for this family.
    pub fn block_type(&self) -> &'static str {
        match self {
            ResiliencyType::Replication => "replica",
            ResiliencyType::ErasureCoding => "fragment",
        }
    }
}

/// Metrics derived from a [`ResiliencyDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResiliencySummary {
    /// Scheme family.
    #[serde(rename = "type")]
    pub kind: ResiliencyType,
    /// Clamped replica count (replication only, zero otherwise).
    pub replicas: u64,
    /// Clamped data fragment count (erasure coding only, zero otherwise).
    pub data_frags: u64,
    /// Clamped parity fragment count (erasure coding only, zero otherwise).
    pub parity_frags: u64,
    /// Redundant bytes stored per logical byte.
    pub storage_overhead: f64,
    /// Number of drives that may fail without data loss.
    pub failure_tolerance: u64,
    /// Minimum number of distinct drives needed to place one chunk.
    pub required_drives: u64,
    /// Rebuild cost class.
    pub rebuild_effort: RebuildEffort,
}

impl ResiliencySummary {
    /// Whether a placement whose drive ceiling is `ceiling` can hold this scheme.
    pub fn is_satisfiable(&self, ceiling: NodeCount) -> bool {
        match ceiling {
            NodeCount::Unbounded => true,
            NodeCount::Finite(drives) => self.required_drives <= drives,
        }
    }
}

fn clamp(value: i64) -> u64 {
    value.max(0) as u64
}

/// Derives overhead, failure tolerance, drive count and rebuild effort.
pub fn summarize(descriptor: &ResiliencyDescriptor) -> ResiliencySummary {
    let summary = match *descriptor {
        ResiliencyDescriptor::Replication { replicas } => {
            let replicas = clamp(replicas);
            let copies = replicas.saturating_sub(1);
            ResiliencySummary {
                kind: ResiliencyType::Replication,
                replicas,
                data_frags: 0,
                parity_frags: 0,
                storage_overhead: copies as f64,
                failure_tolerance: copies,
                required_drives: replicas,
                rebuild_effort: RebuildEffort::Low,
            }
        }
        ResiliencyDescriptor::ErasureCoding {
            data_frags,
            parity_frags,
        } => {
            let data = clamp(data_frags);
            let parity = clamp(parity_frags);
            let storage_overhead = if data > 0 {
                parity as f64 / data as f64
            } else {
                0.0
            };
            ResiliencySummary {
                kind: ResiliencyType::ErasureCoding,
                replicas: 0,
                data_frags: data,
                parity_frags: parity,
                storage_overhead,
                failure_tolerance: parity,
                required_drives: data + parity,
                rebuild_effort: if data <= 4 {
                    RebuildEffort::High
                } else {
                    RebuildEffort::VeryHigh
                },
            }
        }
    };
    debug!(?descriptor, required_drives = summary.required_drives, "summarized resiliency");
    summary
}
