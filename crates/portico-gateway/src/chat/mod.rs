//! Chat sessions and the agentic exchange loop.

pub mod catalog;
pub mod exchange;
pub mod models;
pub mod routes;
pub mod sessions;
