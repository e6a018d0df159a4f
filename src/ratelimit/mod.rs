//! Fixed-window admission control.

mod accountant;
mod identity;
mod limiter;
mod policy;

pub use accountant::{WindowAccountant, WindowTally, DEFAULT_STORE_TIMEOUT};
pub use identity::{extract_identity, ClientIdentity, FORWARDED_FOR};
pub use limiter::{AdmissionController, Decision};
pub use policy::{Policy, StoreFallback, DEFAULT_KEY_PREFIX, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
