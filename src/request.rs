use crate::{hpack::Header, types::*};
use bytes::Bytes;

/// A decoded request as handed to the application callback: pseudo
/// headers lifted into fields, regular headers as a lower-case list.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    /// Assembles a request from a decoded header list, enforcing the
    /// HTTP/2 mapping rules: pseudo-headers come first, are unique and
    /// limited to the request set, names are lower-case, and `:method`
    /// and `:path` are mandatory. Violations make the request malformed,
    /// which callers answer with a stream-level PROTOCOL_ERROR.
    pub fn from_fields(
        stream_id: StreamId,
        fields: &[Header],
        body: Bytes,
    ) -> Result<Self, H2Error> {
        let malformed = || H2Error::Stream(stream_id, ErrorType::ProtocolError);

        let mut method = None;
        let mut path = None;
        let mut scheme = None;
        let mut authority = None;
        let mut headers = Headers::new();
        let mut seen_regular = false;

        for field in fields {
            let name = std::str::from_utf8(&field.name).map_err(|_| malformed())?;
            let value = String::from_utf8_lossy(&field.value).into_owned();
            if let Some(pseudo) = name.strip_prefix(':') {
                if seen_regular {
                    return Err(malformed());
                }
                let slot = match pseudo {
                    "method" => &mut method,
                    "path" => &mut path,
                    "scheme" => &mut scheme,
                    "authority" => &mut authority,
                    _ => return Err(malformed()),
                };
                if slot.replace(value).is_some() {
                    return Err(malformed());
                }
            } else {
                if name.is_empty() || name.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(malformed());
                }
                seen_regular = true;
                headers.push((name.to_owned(), value));
            }
        }

        let method = method.filter(|m| !m.is_empty()).ok_or_else(malformed)?;
        let path = path.filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        Ok(Self {
            method,
            path,
            scheme,
            authority,
            headers,
            body,
        })
    }

    #[must_use]
    pub fn header(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }
}
