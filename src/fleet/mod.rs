// Worker coordination: workspaces, registry, liveness, merges and signals

pub mod context;
pub mod heartbeat;
pub mod merge_coordinator;
pub mod provisioner;
pub mod registry;
pub mod signals;

pub use context::{
    DeadWorkerReport, HeartbeatRequest, HeartbeatResponse, RepositoryContext, SpawnRequest,
    SpawnedWorker, WorkerList,
};
pub use heartbeat::{DeadWorker, HeartbeatMonitor, Liveness};
pub use merge_coordinator::{MergeCoordinator, MergeRequest};
pub use provisioner::{DestroyOutcome, ProvisionedWorkspace, WorkspaceProvisioner};
pub use registry::WorkerRegistry;
pub use signals::{ControlSignalChannel, ControlSignals};
