pub mod base;
pub mod http_backend;

pub use base::{Backend, LoginResponse, RegisterResponse};
pub use http_backend::HttpBackend;
