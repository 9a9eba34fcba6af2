//! Transport-neutral HTTP request and response types.

mod request;
mod response;

pub use request::{ApiRequest, Method};
pub use response::{ApiResponse, StatusCode};
