//! StoryReel pipeline orchestration.
//!
//! Turns AI-generated titles and stories into narrated short videos. Each
//! story is a [`storyreel_models::WorkItem`] moving through a fixed phase
//! sequence recorded in a durable ledger:
//! - [`PhaseScheduler`] picks eligible items and runs one phase step
//! - [`BatchCoordinator`] submits, polls and reconciles provider batches
//! - [`PipelineDriver`] owns the control loop, stop handling and archiving
//!
//! A run can be stopped at any point and resumed later from the ledger
//! without re-submitting outstanding batches.

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod logging;
pub mod materializer;
pub mod metrics;
pub mod prompts;
pub mod retry;
pub mod scheduler;
pub mod summary;

mod transitions;

pub use artifacts::{clean_title, ArtifactStore};
pub use config::{parse_transcription, DriveMode, PipelineConfig, ProviderKind, ProviderSettings};
pub use coordinator::BatchCoordinator;
pub use driver::{PipelineDriver, RunOutcome};
pub use error::{MaterializeError, OrchestratorError, OrchestratorResult};
pub use logging::ItemLogger;
pub use materializer::{LocalMaterializer, Materializer};
pub use prompts::Prompts;
pub use retry::RetryPolicy;
pub use scheduler::{Collaborators, MediaInputs, PhaseScheduler};
pub use summary::{RunSummary, TerminalFailure};
