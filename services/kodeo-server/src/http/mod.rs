//! Hand-built HTTP/1.1 subset: one request parser, one response builder.

pub mod request;
pub mod response;

pub use request::{IncomingRequest, ParseError, read_request};
pub use response::{HttpResponse, HttpResult, OutgoingResponse};
