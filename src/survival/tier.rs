//! Survival Tier Computation
//!
//! Pure mapping from a credit balance to an operating tier. The tier is
//! always recomputed from the balance; it is never an independent source
//! of truth.

use crate::types::SurvivalTier;

/// Balances above this (in cents) run at full capability.
pub const NORMAL_FLOOR_CENTS: i64 = 50;

/// Balances above this (in cents) but at or below the normal floor run
/// in low-compute mode.
pub const LOW_COMPUTE_FLOOR_CENTS: i64 = 10;

/// Model forced outside the `Normal` tier. This is a hard override, not
/// a suggestion: callers' model preferences are ignored once the balance
/// drops.
pub const LOW_COMPUTE_MODEL: &str = "gpt-4o-mini";

/// Compute the survival tier for a credit balance in integer cents.
///
/// Total over all of `i64`: every input maps to exactly one tier, and the
/// tier is monotone non-increasing in the balance.
pub fn tier_for_credits(credits_cents: i64) -> SurvivalTier {
    if credits_cents > NORMAL_FLOOR_CENTS {
        SurvivalTier::Normal
    } else if credits_cents > LOW_COMPUTE_FLOOR_CENTS {
        SurvivalTier::LowCompute
    } else if credits_cents > 0 {
        SurvivalTier::Critical
    } else {
        SurvivalTier::Dead
    }
}

/// Whether any inference spend is permitted at this tier.
///
/// Inference stays available all the way down to `Critical`; only a dead
/// agent (credits exhausted) is cut off entirely.
pub fn can_run_inference(tier: SurvivalTier) -> bool {
    tier != SurvivalTier::Dead
}

/// The model to use at this tier. `Normal` keeps the caller's default;
/// every other tier forces [`LOW_COMPUTE_MODEL`].
pub fn model_for_tier(tier: SurvivalTier, default_model: &str) -> String {
    match tier {
        SurvivalTier::Normal => default_model.to_string(),
        SurvivalTier::LowCompute | SurvivalTier::Critical | SurvivalTier::Dead => {
            LOW_COMPUTE_MODEL.to_string()
        }
    }
}
