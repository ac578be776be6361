//! Exact quota breakdown of a bucket's used and uploadable bytes.
//!
//! All arithmetic is done in `u128`: a quota of `u64::MAX` exabytes still fits,
//! so nothing here can overflow or round.

use serde::{Deserialize, Serialize};

/// Unit a quota size is expressed in. Binary multiples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaUnit {
    /// 2^10 bytes.
    Kilobyte,
    /// 2^20 bytes.
    Megabyte,
    /// 2^30 bytes.
    Gigabyte,
    /// 2^40 bytes.
    Terabyte,
    /// 2^50 bytes.
    Petabyte,
    /// 2^60 bytes.
    Exabyte,
}

impl QuotaUnit {
    /// Bytes per unit.
    pub fn multiplier(&self) -> u128 {
        let shift = match self {
            QuotaUnit::Kilobyte => 10,
            QuotaUnit::Megabyte => 20,
            QuotaUnit::Gigabyte => 30,
            QuotaUnit::Terabyte => 40,
            QuotaUnit::Petabyte => 50,
            QuotaUnit::Exabyte => 60,
        };
        1u128 << shift
    }
}

/// A configured bucket quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Size in `unit`s.
    pub size: u64,
    /// Unit of `size`.
    pub unit: QuotaUnit,
}

impl Quota {
    /// Quota in bytes.
    pub fn bytes(&self) -> u128 {
        u128::from(self.size) * self.unit.multiplier()
    }
}

/// Byte size of a quota; zero when no quota is set.
pub fn quota_bytes(quota: Option<&Quota>) -> u128 {
    quota.map_or(0, Quota::bytes)
}

/// How a bucket's data and free space relate to its quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakdown {
    /// Used bytes that fit under the quota.
    pub used: u128,
    /// Used bytes beyond the quota.
    pub overused: u128,
    /// Uploadable bytes that fit under the quota.
    pub available_for_upload: u128,
    /// Physically available bytes the quota does not allow.
    pub potential_for_upload: u128,
    /// Quota headroom with no physical capacity behind it.
    pub overallocated: u128,
}

/// Splits `used` and `available_for_upload` against an optional quota.
///
/// Without a quota both pass through and the other fields are zero.
pub fn quota_breakdown(used: u128, available_for_upload: u128, quota: Option<&Quota>) -> DataBreakdown {
    let Some(quota) = quota else {
        return DataBreakdown {
            used,
            available_for_upload,
            ..DataBreakdown::default()
        };
    };

    let quota_bytes = quota.bytes();
    let used_in_quota = used.min(quota_bytes);
    let remaining = quota_bytes.saturating_sub(used);
    let available = available_for_upload.min(remaining);

    DataBreakdown {
        used: used_in_quota,
        overused: used - used_in_quota,
        available_for_upload: available,
        potential_for_upload: available_for_upload - available,
        overallocated: remaining.saturating_sub(available_for_upload),
    }
}
