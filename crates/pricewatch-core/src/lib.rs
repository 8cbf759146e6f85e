pub mod budget;
pub mod category;
pub mod config;
pub mod interfaces;
pub mod types;

pub use budget::CostBudget;
pub use category::{ErrorCategory, TerminalReason};
pub use config::{build_config, load_config, ConfigError, PipelineConfig};
pub use interfaces::{
    CollaboratorError, CommitOutcome, HealthEvents, ModelExtractor, ProposedFields,
    ProposedSelectors, TargetRepository,
};
pub use types::{
    AttemptRecord, ExtractionOutcome, ExtractionTarget, FailureCounter, FieldSelectors,
    ProductFields, ScheduleScope, ScheduleSpec, SelectorSet, StoreHealth, StrategyKind,
};
