//! Test utilities for the upload server.
//!
//! This crate provides utilities to facilitate integration testing of the upload server. See the
//! modules for all available utilities.

pub mod server;
pub mod tracing;
