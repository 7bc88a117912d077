//! Engine configuration.
//!
//! Settings structs for every tunable behavior, plus the warmup content
//! pools. All types serialize to JSON for file-based configuration.

mod content;
mod settings;

pub use content::{WarmupContentPools, WarmupReplyPools};
pub use settings::{
    DeliverabilitySettings, EngineSettings, ReputationDeltas, RetryPolicy, SyncEngineSettings,
    WarmupEngineSettings,
};
