//! Interfaces to the external collaborators.
//!
//! The core never embeds storage, model, or notification logic; it calls
//! these awaited traits. Implementations live outside the pipeline crates
//! (database layer, model gateway, notification service).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::category::TerminalReason;
use crate::types::{
    AttemptRecord, ExtractionTarget, FailureCounter, ProductFields, SelectorSet,
};

/// Result of a compare-and-swap selector commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Another writer committed first; re-read and re-validate before retrying.
    VersionConflict,
}

/// Errors surfaced by collaborator implementations. The core treats them as
/// opaque; it only logs and converts them to outcome categories.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Persistence for targets, outcomes, counters, and selector sets.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Targets whose next-due time has passed, ordered oldest-due first.
    async fn load_due_targets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExtractionTarget>, CollaboratorError>;

    async fn save_outcome(&self, record: AttemptRecord) -> Result<(), CollaboratorError>;

    /// Current selector set for a domain, if one is configured.
    async fn selector_set(&self, domain: &str)
        -> Result<Option<SelectorSet>, CollaboratorError>;

    /// Atomically replaces the domain's selector set. Succeeds only when the
    /// stored version still equals `expected_version`.
    async fn commit_selector_set(
        &self,
        domain: &str,
        expected_version: u64,
        set: SelectorSet,
    ) -> Result<CommitOutcome, CollaboratorError>;

    async fn failure_counter(&self, target: Uuid) -> Result<FailureCounter, CollaboratorError>;

    async fn set_failure_counter(
        &self,
        target: Uuid,
        counter: FailureCounter,
    ) -> Result<(), CollaboratorError>;

    /// Marks a target terminal; it is excluded from scheduling until cleared.
    async fn mark_terminal(
        &self,
        target: Uuid,
        reason: TerminalReason,
    ) -> Result<(), CollaboratorError>;

    /// Why the target is out of rotation, if it is.
    async fn terminal_reason(
        &self,
        target: Uuid,
    ) -> Result<Option<TerminalReason>, CollaboratorError>;

    /// Manual retry: clears the terminal mark and resets both counters.
    async fn clear_terminal(&self, target: Uuid) -> Result<(), CollaboratorError>;
}

/// Field values proposed by the model collaborator, with metered cost.
#[derive(Debug, Clone)]
pub struct ProposedFields {
    pub fields: ProductFields,
    pub tokens_spent: i64,
}

/// Selector set proposed by the model collaborator, with metered cost.
#[derive(Debug, Clone)]
pub struct ProposedSelectors {
    pub set: SelectorSet,
    pub tokens_spent: i64,
}

/// Model-assisted extraction service. Both calls are token-metered; callers
/// must check the shared [`crate::CostBudget`] first.
#[async_trait]
pub trait ModelExtractor: Send + Sync {
    /// Extracts product fields from cleaned page text.
    async fn extract_fields(
        &self,
        page_text: &str,
        currency_hint: &str,
    ) -> Result<ProposedFields, CollaboratorError>;

    /// Proposes CSS selectors that locate the given fields on the page.
    async fn propose_selectors(
        &self,
        page_text: &str,
        fields: &ProductFields,
    ) -> Result<ProposedSelectors, CollaboratorError>;
}

/// Sink for terminal-state transitions. The core emits events; delivery and
/// formatting happen elsewhere.
#[async_trait]
pub trait HealthEvents: Send + Sync {
    async fn target_needs_attention(&self, target: Uuid, domain: &str);

    async fn domain_flagged(&self, domain: &str, success_rate: f64);
}
