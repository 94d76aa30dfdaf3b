pub mod audit;
pub mod decision;
pub mod generation;
pub mod jobs;
pub mod knowledge;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use session::{SessionMode, SessionState, SessionStatus, SpeakerRole};
pub use store::{SessionStore, StoreError};
pub use transport::Transport;
