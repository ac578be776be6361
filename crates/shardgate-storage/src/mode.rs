//! Bucket, placement, resiliency and quota health modes.
//!
//! The modes themselves are computed by collaborators from live health
//! signals; this module only fixes the vocabulary and the writability rule.

use serde::{Deserialize, Serialize};

/// Overall health of a bucket. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketMode {
    /// No storage resources attached.
    NoResources,
    /// Not enough drives to meet the resiliency policy.
    NotEnoughResources,
    /// Not enough healthy storage resources.
    NotEnoughHealthyResources,
    /// No potential available storage.
    NoCapacity,
    /// Used bytes exceed the configured quota.
    ExceedingQuota,
    /// Data spilling back to resources.
    SpillingBack,
    /// Storage is low.
    LowCapacity,
    /// Failure tolerance is below the policy.
    RiskyTolerance,
    /// Approaching the configured quota.
    #[serde(alias = "APPROUCHING_QUOTA")]
    ApproachingQuota,
    /// Rebuild or migration in progress.
    DataActivity,
    /// Healthy.
    Optimal,
}

impl BucketMode {
    /// Every mode, worst first.
    pub const ALL: [BucketMode; 11] = [
        BucketMode::NoResources,
        BucketMode::NotEnoughResources,
        BucketMode::NotEnoughHealthyResources,
        BucketMode::NoCapacity,
        BucketMode::ExceedingQuota,
        BucketMode::SpillingBack,
        BucketMode::LowCapacity,
        BucketMode::RiskyTolerance,
        BucketMode::ApproachingQuota,
        BucketMode::DataActivity,
        BucketMode::Optimal,
    ];

    /// Writes are accepted in every mode except the hard resource, capacity
    /// and quota failures.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            BucketMode::SpillingBack
                | BucketMode::LowCapacity
                | BucketMode::RiskyTolerance
                | BucketMode::ApproachingQuota
                | BucketMode::DataActivity
                | BucketMode::Optimal
        )
    }

    /// Whether the mode signals a problem that needs attention.
    pub fn is_error(&self) -> bool {
        !self.is_writable()
    }
}

/// Health of a bucket's placement policy.
///
/// Variants carry the meaning of the [`BucketMode`] of the same name.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementMode {
    NoResources,
    NotEnoughResources,
    NotEnoughHealthyResources,
    NoCapacity,
    RiskyTolerance,
    LowCapacity,
    DataActivity,
    SpillingBack,
    Optimal,
}

impl From<PlacementMode> for BucketMode {
    fn from(mode: PlacementMode) -> Self {
        match mode {
            PlacementMode::NoResources => BucketMode::NoResources,
            PlacementMode::NotEnoughResources => BucketMode::NotEnoughResources,
            PlacementMode::NotEnoughHealthyResources => BucketMode::NotEnoughHealthyResources,
            PlacementMode::NoCapacity => BucketMode::NoCapacity,
            PlacementMode::RiskyTolerance => BucketMode::RiskyTolerance,
            PlacementMode::LowCapacity => BucketMode::LowCapacity,
            PlacementMode::DataActivity => BucketMode::DataActivity,
            PlacementMode::SpillingBack => BucketMode::SpillingBack,
            PlacementMode::Optimal => BucketMode::Optimal,
        }
    }
}

/// Health of a bucket's resiliency policy.
///
/// Variants carry the meaning of the [`BucketMode`] of the same name.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResiliencyMode {
    NotEnoughResources,
    RiskyTolerance,
    DataActivity,
    Optimal,
}

impl From<ResiliencyMode> for BucketMode {
    fn from(mode: ResiliencyMode) -> Self {
        match mode {
            ResiliencyMode::NotEnoughResources => BucketMode::NotEnoughResources,
            ResiliencyMode::RiskyTolerance => BucketMode::RiskyTolerance,
            ResiliencyMode::DataActivity => BucketMode::DataActivity,
            ResiliencyMode::Optimal => BucketMode::Optimal,
        }
    }
}

/// Health of a bucket's quota.
///
/// Variants carry the meaning of the [`BucketMode`] of the same name.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaMode {
    ExceedingQuota,
    #[serde(alias = "APPROUCHING_QUOTA")]
    ApproachingQuota,
    Optimal,
}

impl From<QuotaMode> for BucketMode {
    fn from(mode: QuotaMode) -> Self {
        match mode {
            QuotaMode::ExceedingQuota => BucketMode::ExceedingQuota,
            QuotaMode::ApproachingQuota => BucketMode::ApproachingQuota,
            QuotaMode::Optimal => BucketMode::Optimal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_states() {
        assert!(!BucketMode::ExceedingQuota.is_writable());
        assert!(BucketMode::Optimal.is_writable());
        assert!(BucketMode::DataActivity.is_writable());
        assert!(BucketMode::SpillingBack.is_writable());
        assert!(BucketMode::ApproachingQuota.is_writable());
    }

    #[test]
    fn test_hard_failures_not_writable() {
        let blocked: Vec<BucketMode> = BucketMode::ALL
            .iter()
            .copied()
            .filter(|m| !m.is_writable())
            .collect();
        assert_eq!(
            blocked,
            vec![
                BucketMode::NoResources,
                BucketMode::NotEnoughResources,
                BucketMode::NotEnoughHealthyResources,
                BucketMode::NoCapacity,
                BucketMode::ExceedingQuota,
            ]
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&BucketMode::NotEnoughHealthyResources).unwrap();
        assert_eq!(json, "\"NOT_ENOUGH_HEALTHY_RESOURCES\"");

        let legacy: BucketMode = serde_json::from_str("\"APPROUCHING_QUOTA\"").unwrap();
        assert_eq!(legacy, BucketMode::ApproachingQuota);
    }

    #[test]
    fn test_sub_modes_convert() {
        assert_eq!(BucketMode::from(QuotaMode::ExceedingQuota), BucketMode::ExceedingQuota);
        assert_eq!(BucketMode::from(PlacementMode::SpillingBack), BucketMode::SpillingBack);
        assert!(!BucketMode::from(ResiliencyMode::NotEnoughResources).is_writable());
    }
}
