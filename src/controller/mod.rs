pub mod clock;
pub mod config_tracker;
pub mod error;
pub mod factory;
pub mod readiness;
pub mod reconcile;
pub mod store;
pub mod workload;

pub use error::{ErrorKind, ObjectRef, WorkloadError};
pub use factory::{ControllerFactory, WorkloadClients};
pub use reconcile::{error_policy, reconcile, Context};
pub use workload::{WorkloadController, WorkloadKind, WorkloadMetadata};
