mod ids;
mod shutdown;

pub mod prelude {
    pub use crate::ids::{RunId, ScenarioId};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
}
