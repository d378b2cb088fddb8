pub mod actor;
pub mod authenticator;
pub mod polling;
pub mod session;

pub use actor::WsSession;
pub use authenticator::{
    ConnectionAuthenticator, IdentityResolution, IdentitySource, Principal, Role,
};
pub use polling::{PollOutcome, PollingRegistry};
pub use session::{SessionControl, SessionServices, StompSession};
