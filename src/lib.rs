#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub(crate) mod concepts;
pub mod config;
pub mod observability;
pub(crate) mod pipeline;
pub(crate) mod queue;
pub(crate) mod schema;
pub(crate) mod store;
pub(crate) mod util;
