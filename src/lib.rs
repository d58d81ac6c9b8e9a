//! Yle news reader built around a rate-limited refresh controller.
//!
//! The upstream feeds do not allow cross-origin access, so the reader fetches
//! them through a CORS proxy. Every feed key carries a bounded request budget;
//! when the budget runs out, or the fetch fails, the last successful result
//! set is served from a durable local cache instead.

pub mod config;
pub mod controller;
pub mod feed;
pub mod limiter;
pub mod server;
pub mod storage;
