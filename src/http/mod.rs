//! HTTP boundary: admission middleware, routes and server.

mod middleware;
mod routes;
mod server;

pub use middleware::{admission_middleware, AdmissionGate, Rejection, REJECTION_MESSAGE};
pub use routes::{AppState, HealthResponse, IdentityResponse};
pub use server::{router, HttpServer};
