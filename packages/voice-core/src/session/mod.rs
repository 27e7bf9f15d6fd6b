//! Session identity, data model, and the process-wide session registry.

mod id;
mod registry;
mod state;

pub use id::SessionId;
pub use registry::{SessionRegistry, SessionTeardown};
pub use state::{History, Role, Session, SessionState, Turn};
