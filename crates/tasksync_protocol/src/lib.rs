//! # tasksync protocol
//!
//! Wire types exchanged between the sync engine and the HTTP/JSON layer.
//!
//! This crate provides:
//! - Request and response messages (create, update, get, list, tags, pull)
//! - `WireChange`, the JSON form of a change feed operation
//! - Conversion between JSON values and typed field values
//! - The timestamp convention at the boundary (epoch milliseconds out,
//!   epoch milliseconds or RFC 3339 in)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod timestamp;
mod value;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    CreateRequest, ErrorResponse, GetRequest, ListRequest, ListResponse, PullRequest,
    PullResponse, RecordResponse, TagsResponse, UpdateRequest, WireRecord,
};
pub use operation::WireChange;
pub use timestamp::{format_rfc3339, parse_rfc3339, parse_timestamp};
pub use value::{field_from_json, field_to_json, flag_from_json};
