//! Data model: requests, responses, and the queued-request envelope.

pub mod request;

pub use request::*;
