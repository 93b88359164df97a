//! Purchase request approval workflow.
//!
//! A purchase request moves through a fixed chain of approval stages
//! ([`status::STAGES`]). Only users holding a role authorized for the current
//! stage may approve or reject it, and every transition appends to both the
//! approval history and the timeline. [`service::PurchaseRequestService`] is
//! the entry point.

pub mod audit;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notify;
pub mod request;
pub mod status;
pub mod service;
pub mod store;
pub mod utils;
