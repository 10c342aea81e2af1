#![warn(clippy::unwrap_used)]

pub mod admin_rest;
pub mod rest;
pub mod rewards_rest;
pub mod server;

pub use server::{router, ApiServer};
