//! Actor-based scheduling
//!
//! Each periodic task runs as an independent tokio task owning an mpsc
//! command receiver and exposing a cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!                       ┌──────────────┐
//!                       │ Orchestrator │
//!                       └──────┬───────┘
//!                              │ spawns
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        │              │              │              │
//!  ┌─────▼──────┐ ┌─────▼──────┐ ┌─────▼──────┐ ┌─────▼─────┐
//!  │ Dispatcher │ │ Dispatcher │ │   Status   │ │ Retention │
//!  │  (linux)   │ │ (windows…) │ │   Sweep    │ │           │
//!  └─────┬──────┘ └─────┬──────┘ └─────┬──────┘ └─────┬─────┘
//!        │              │              │              │
//!        └──────────────┴──────┬───────┴──────────────┘
//!                              │
//!                     ┌────────▼────────┐
//!                     │ StorageBackend  │
//!                     └─────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **CollectionDispatcher**: one per system type, runs collection jobs
//! - **StatusSweepActor**: downgrades stale systems
//! - **RetentionActor**: purges old metrics and logs

pub mod dispatcher;
pub mod messages;
pub mod retention;
pub mod status_sweep;

pub use dispatcher::{CollectionDispatcher, CollectionRunner, DispatcherHandle};
pub use retention::{RetentionActor, RetentionHandle, RetentionReport};
pub use status_sweep::{StatusSweepActor, StatusSweeper, StatusTransition, SweepHandle, SweepReport};
