//! HTTP handlers, grouped by caller.

pub mod admin;
pub mod notify;
pub mod ops;
pub mod user;
pub mod views;
pub mod ws;
