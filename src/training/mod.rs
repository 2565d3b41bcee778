//! Training objectives.
//!
//! `supervised` holds the cross-entropy and optimizer plumbing shared by
//! every objective; `reinforce` trains decoders from sequence rewards
//! computed by a `reward` function.

pub mod reinforce;
pub mod reward;
pub mod supervised;

pub use reinforce::{rl_objective, ReinforceConfig, ReinforceObjective, ReinforceStep, RewardBaseline};
pub use reward::{RewardFunction, SentenceBleu};
