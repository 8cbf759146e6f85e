//! Failure classification, selector regeneration, and domain health.
//!
//! This crate decides what happens after an extraction fails: wait it out,
//! regenerate the domain's selectors with model help, or take the target
//! out of rotation.

pub mod classify;
pub mod health;
pub mod regenerate;
pub mod state;

pub use classify::{next_action, HealingPolicy, NextAction};
pub use health::HealthTracker;
pub use regenerate::{HealOutcome, SelectorRegenerator};
pub use state::TargetState;
