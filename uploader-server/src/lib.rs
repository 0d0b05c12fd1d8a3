//! The upload server component.
//!
//! This builds on top of the [`uploader_service`], and exposes file uploads through a GraphQL
//! mutation served over `HTTP`.

pub mod cli;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod graphql;
pub mod harness;
pub mod healthcheck;
pub mod observability;
pub mod state;
pub mod web;
