//! Use-case services over the store.
//!
//! # Responsibility
//! - Orchestrate repositories and the action registry into engine operations.
//! - Own transaction boundaries; callers never see partial writes.

pub mod change_service;
pub mod diff;
