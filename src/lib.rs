//! ember - A cold-email outreach and mailbox warmup engine
//!
//! This crate provides the core engine behind a cold-outreach product:
//! campaign sequencing, mailbox warmup, inbox synchronization, message
//! classification, and deliverability bookkeeping.

pub mod config;
pub mod domain;
pub mod engine;
pub mod providers;
pub mod services;
pub mod storage;

pub use engine::Engine;
