//! Supervisor and telemetry aggregator for an external CPU miner.
//!
//! The daemon launches a solo-mining `cpuminer` process, scrapes its log
//! output into a shared [`state::StateStore`], enriches that with the chain
//! tip height and BTC price from public APIs, and publishes a periodic
//! snapshot through an HTTP API.

pub mod api;
pub mod api_client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod parser;
pub mod poller;
pub mod projection;
pub mod state;
pub mod supervisor;
pub mod tracing;
pub mod types;
