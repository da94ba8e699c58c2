//! Page fetching with rotating identity
//!
//! [`FetchTransport`] issues single requests with delay, retry and
//! backoff; [`SessionManager`] owns the HTTP sessions it uses and
//! rotates them on age or on access-denied responses.

pub mod delay;
pub mod identity;
pub mod session;
pub mod transport;

pub use delay::DelayPolicy;
pub use identity::{Identity, IdentityPool};
pub use session::{RotationReason, Session, SessionManager};
pub use transport::{FetchTransport, FetchedPage};
