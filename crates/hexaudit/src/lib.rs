#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! hexaudit library - encrypted audit trail, HTTP API and shared types

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod logging;
pub mod state;
