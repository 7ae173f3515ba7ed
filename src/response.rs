use crate::{request::Request, types::Headers};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Lower-case names, no pseudo-headers; `:status` is added by the
    /// encoder.
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A plain-text response with `content-type` and `content-length`
    /// filled in.
    #[must_use]
    pub fn text(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: vec![
                ("content-type".to_owned(), "text/plain".to_owned()),
                ("content-length".to_owned(), body.len().to_string()),
            ],
            body,
        }
    }
}

/// The application callback: one decoded request in, one response out.
/// The protocol handler takes care of all framing, compression and flow
/// control around it.
pub trait RequestHandler {
    fn handle(&self, request: Request) -> Response;
}

/// Default callback: echoes the request path.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: Request) -> Response {
        Response::text(200, request.path.into_bytes())
    }
}
