//! # reelsmith-pipeline
//!
//! Assembly of per-scene video clips and narration into one advertisement.
//!
//! This crate provides:
//!
//! - **Data model** ([`job`]) -- [`SceneMediaJob`], [`PipelineRun`] and the
//!   monotonic [`RunStatus`] state machine.
//! - **[`TempResourceTracker`]** -- run-scoped registry of every artifact a
//!   run creates, released exactly once through a [`RunScope`] guard.
//! - **[`Stager`]** -- materializes remote or local scene video references.
//! - **[`MediaAssemblyPipeline`]** -- runs the per-scene stages concurrently
//!   under a worker limit, then concatenates in scene order.
//! - **[`sweep_stale`]** -- removes leftovers of crashed processes from the
//!   work directory.

pub mod assembler;
pub mod context;
pub mod job;
pub mod stage;
pub mod sweep;
pub mod tracker;

pub use assembler::{MediaAssemblyPipeline, PipelineSettings};
pub use context::StatusSender;
pub use job::{JobPhase, MediaSource, PipelineRun, RunStatus, SceneMediaJob};
pub use stage::{StagedMedia, Stager};
pub use sweep::{sweep_stale, SweepReport};
pub use tracker::{ReleaseReport, RunScope, TempResourceTracker};
