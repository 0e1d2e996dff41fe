//! HTTP API server.
//!
//! This module implements the REST API for controlling and monitoring the
//! miner from outside the daemon. Built on Axum, it serves the state
//! published by the refresh tick and forwards start, stop and power
//! commands to the supervisor.
//!
//! The API binds to localhost only by default and does not require
//! authentication for local access.

mod server;
mod v0;

pub use server::{ApiConfig, serve};
