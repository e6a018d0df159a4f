//! Turnstile - Distributed Admission Control
//!
//! This crate implements fixed-window request admission for HTTP services
//! running as many stateless instances. Every instance counts attempts in one
//! shared Redis store, so a client's quota holds no matter which process
//! answers it.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
