#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
)]

pub mod config;
pub mod connection;
pub mod flags;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod protocol;
pub mod reactor;
pub mod request;
pub mod response;
pub mod settings;
pub mod stream;
pub mod supervisor;
pub mod tls;
pub mod types;

pub use bytes::Bytes;
pub use protocol::ProtocolHandler;
pub use request::Request;
pub use response::{EchoHandler, RequestHandler, Response};
