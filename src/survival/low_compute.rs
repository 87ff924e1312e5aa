//! Low Compute Mode
//!
//! Side-effecting half of the survival engine: records tier transitions
//! in a bounded history and pushes the current tier's restrictions into
//! the inference collaborator and the kv store.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::Database;
use crate::types::{InferenceClient, ModeTransition, SurvivalTier};

/// kv key holding the tier most recently applied by
/// [`apply_tier_restrictions`].
pub const CURRENT_TIER_KEY: &str = "current_tier";

/// Transition history is pruned to this many entries, oldest first.
pub const MAX_TRANSITION_HISTORY: u32 = 50;

/// Record a tier transition, but only when the tier actually changed.
///
/// Returns the appended record, or `None` when `from == to` (the call is
/// idempotent with respect to an unchanged tier). The history is pruned
/// FIFO to [`MAX_TRANSITION_HISTORY`] entries after every append.
pub fn record_transition(
    db: &Database,
    from: SurvivalTier,
    to: SurvivalTier,
    credits_cents: i64,
) -> Result<Option<ModeTransition>> {
    if from == to {
        return Ok(None);
    }

    let transition = ModeTransition {
        id: Uuid::new_v4().to_string(),
        from_tier: from,
        to_tier: to,
        credits_cents,
        transitioned_at: Utc::now().to_rfc3339(),
    };

    db.insert_mode_transition(&transition)
        .context("failed to record tier transition")?;
    db.prune_mode_transitions(MAX_TRANSITION_HISTORY)
        .context("failed to prune tier transition history")?;

    info!(
        "Tier transition: {} -> {} at {} cents",
        from, to, credits_cents
    );

    Ok(Some(transition))
}

/// Apply the restrictions the given tier implies.
///
/// Flips the inference collaborator's low-compute flag (set for every
/// tier except `Normal`) and persists the tier marker. Idempotent: safe
/// to call every tick whether or not the tier changed.
pub fn apply_tier_restrictions(
    db: &Database,
    inference: &dyn InferenceClient,
    tier: SurvivalTier,
) -> Result<()> {
    let low_compute = tier != SurvivalTier::Normal;
    inference.set_low_compute_mode(low_compute);

    if low_compute {
        warn!("Tier {}: low-compute restrictions in effect", tier);
    } else {
        debug!("Tier normal: no restrictions");
    }

    db.set_kv(CURRENT_TIER_KEY, tier.as_str())
        .context("failed to store current tier marker")?;

    Ok(())
}

/// One-call tier bookkeeping for the daemon's tick: compares the freshly
/// computed tier against the persisted marker, records a transition when
/// it changed, and applies the tier's restrictions.
///
/// A missing marker is treated as `Normal`, so a cold start into a
/// degraded tier still leaves a transition record behind.
pub fn observe_tier(
    db: &Database,
    inference: &dyn InferenceClient,
    tier: SurvivalTier,
    credits_cents: i64,
) -> Result<()> {
    let prev = db
        .get_kv(CURRENT_TIER_KEY)?
        .and_then(|s| SurvivalTier::from_marker(&s))
        .unwrap_or(SurvivalTier::Normal);

    record_transition(db, prev, tier, credits_cents)?;
    apply_tier_restrictions(db, inference, tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survival::tier::tier_for_credits;
    use crate::testkit::MockInferenceClient;

    #[test]
    fn record_transition_appends_only_on_change() {
        let db = Database::open_in_memory().unwrap();

        let first = record_transition(&db, SurvivalTier::Normal, SurvivalTier::Critical, 5)
            .unwrap();
        assert!(first.is_some());
        assert_eq!(db.count_mode_transitions().unwrap(), 1);

        // Same tier on both sides: no append.
        let second = record_transition(&db, SurvivalTier::Critical, SurvivalTier::Critical, 4)
            .unwrap();
        assert!(second.is_none());
        assert_eq!(db.count_mode_transitions().unwrap(), 1);
    }

    #[test]
    fn transition_history_never_exceeds_cap() {
        let db = Database::open_in_memory().unwrap();

        // Alternate tiers so every call records.
        for i in 0..120_i64 {
            let (from, to) = if i % 2 == 0 {
                (SurvivalTier::Normal, SurvivalTier::LowCompute)
            } else {
                (SurvivalTier::LowCompute, SurvivalTier::Normal)
            };
            record_transition(&db, from, to, 100 - i).unwrap();
        }

        assert_eq!(db.count_mode_transitions().unwrap(), MAX_TRANSITION_HISTORY);

        // The survivors are the newest entries (FIFO eviction).
        let newest = db.get_mode_transitions(1).unwrap();
        assert_eq!(newest[0].credits_cents, 100 - 119);
    }

    #[test]
    fn apply_restrictions_sets_flag_and_marker() {
        let db = Database::open_in_memory().unwrap();
        let inference = MockInferenceClient::new("gpt-4o");

        apply_tier_restrictions(&db, &inference, SurvivalTier::Critical).unwrap();
        assert!(inference.low_compute_enabled());
        assert_eq!(
            db.get_kv(CURRENT_TIER_KEY).unwrap().as_deref(),
            Some("critical")
        );

        // Calling again with the same tier is harmless.
        apply_tier_restrictions(&db, &inference, SurvivalTier::Critical).unwrap();
        assert!(inference.low_compute_enabled());

        apply_tier_restrictions(&db, &inference, SurvivalTier::Normal).unwrap();
        assert!(!inference.low_compute_enabled());
        assert_eq!(
            db.get_kv(CURRENT_TIER_KEY).unwrap().as_deref(),
            Some("normal")
        );
    }

    #[test]
    fn observe_tier_records_once_per_change() {
        let db = Database::open_in_memory().unwrap();
        let inference = MockInferenceClient::new("gpt-4o");

        let tier = tier_for_credits(5);
        observe_tier(&db, &inference, tier, 5).unwrap();
        assert_eq!(db.count_mode_transitions().unwrap(), 1);

        // Same balance on the next tick: marker matches, nothing appended.
        observe_tier(&db, &inference, tier, 5).unwrap();
        assert_eq!(db.count_mode_transitions().unwrap(), 1);

        // Recovery back to normal appends exactly one more.
        observe_tier(&db, &inference, tier_for_credits(500), 500).unwrap();
        assert_eq!(db.count_mode_transitions().unwrap(), 2);
    }
}
