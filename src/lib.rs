#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod extract;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod util;
