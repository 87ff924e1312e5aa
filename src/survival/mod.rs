//! Survival Module
//!
//! Maps the agent's credit balance onto operating tiers and applies the
//! capability restrictions each tier implies. The tier computation is a
//! pure function; everything side-effecting lives in `low_compute`.

pub mod low_compute;
pub mod tier;

pub use low_compute::{
    apply_tier_restrictions, observe_tier, record_transition, CURRENT_TIER_KEY,
    MAX_TRANSITION_HISTORY,
};
pub use tier::{can_run_inference, model_for_tier, tier_for_credits, LOW_COMPUTE_MODEL};
