//! Request-path services shared by the route handlers.

pub mod gateway;

pub use gateway::{InlineFetch, ResourceGateway, Submission};
