//! Command types for actor communication
//!
//! Every actor owns an mpsc receiver of one of these enums. Requests that
//! need an answer carry a oneshot `respond_to` sender.

use tokio::sync::oneshot;

use crate::job::JobReport;
use crate::storage::StorageResult;

use super::retention::RetentionReport;
use super::status_sweep::SweepReport;

/// Commands that can be sent to a CollectionDispatcher
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Run one collection job now, outside the cadence
    ///
    /// Answers `None` when the type has no provisioned hosts.
    TriggerNow {
        respond_to: oneshot::Sender<Option<JobReport>>,
    },

    /// Change the cadence; the next tick is one full interval away
    UpdateInterval { interval_secs: u64 },

    /// Stop ticking and abort in-flight jobs
    Shutdown,
}

/// Commands that can be sent to the StatusSweepActor
#[derive(Debug)]
pub enum SweepCommand {
    SweepNow {
        respond_to: oneshot::Sender<StorageResult<SweepReport>>,
    },

    Shutdown,
}

/// Commands that can be sent to the RetentionActor
#[derive(Debug)]
pub enum RetentionCommand {
    CleanupNow {
        respond_to: oneshot::Sender<StorageResult<RetentionReport>>,
    },

    Shutdown,
}
