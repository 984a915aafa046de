//! Library exports for campus-auth, shared between the binary and tests.

pub mod authz;
pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod models;
pub mod session;
pub mod startup;
pub mod state;
pub mod store;
pub mod utils;
