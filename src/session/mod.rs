//! Session layer: login sessions and the public-exposure guard.

pub mod guard;
pub mod store;

pub use guard::{
    check_allow_public_without_auth, check_external_access_tripwire, log_external_access_error, AccessError,
};
pub use store::{SessionError, SessionStore};
