//! Database connection discovery across cloud providers and local containers.
//!
//! The [`orchestrator::Orchestrator`] owns all discovery state and drives the
//! provider adapters in [`cloud`] plus the [`docker`] inspector. Front ends
//! read [`rows`] from it and send picker actions back through
//! [`orchestrator::Orchestrator::select`].

pub mod cache;
pub mod catalog;
pub mod cloud;
pub mod command;
pub mod config;
pub mod connections;
pub mod dispatch;
pub mod docker;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod rows;
