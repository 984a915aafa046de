pub mod service;
pub mod state;
pub mod token;

pub use service::{BootstrapOutcome, SessionService};
pub use state::{AuthAction, Credentials, Phase, SessionState};
