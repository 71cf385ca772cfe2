//! Persistent-channel frame codec.
//!
//! Every frame starts with `COMMAND SP ID CRLF` (a bare `LF` is accepted)
//! followed by a command-specific body:
//!
//! - `REQUEST id` + an HTTP/1.x request head
//! - `EVENT id` + a query-encoded parameter update
//! - `CLOSE id`
//!
//! The server answers with `RESPONSE id` + status line, headers and body,
//! `APPLY id` + JSON output, and `DONE id`.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use bytes::{BufMut, Bytes, BytesMut};
use wok_core::{Output, Params, WokError};

use crate::app::RequestHead;

/// Client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open an invocation.
    Request,
    /// Deliver a parameter update.
    Event,
    /// Cancel an invocation.
    Close,
    /// Anything else; ignored.
    Unknown(String),
}

impl Command {
    fn parse(raw: &[u8]) -> Self {
        match raw {
            b"REQUEST" => Self::Request,
            b"EVENT" => Self::Event,
            b"CLOSE" => Self::Close,
            other => Self::Unknown(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

/// One decoded client frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// What to do.
    pub command: Command,
    /// Invocation id.
    pub id: String,
    /// Everything after the first line.
    pub body: Bytes,
}

fn protocol(reason: impl Into<String>) -> WokError {
    WokError::Protocol(reason.into())
}

/// Split a frame into command, id and body.
pub fn parse_frame(data: &[u8]) -> Result<Frame, WokError> {
    let space = data
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| protocol("frame has no command separator"))?;
    let command = Command::parse(&data[..space]);

    let rest = &data[space + 1..];
    let newline = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| protocol("frame has no line terminator"))?;
    let id_bytes = rest[..newline].strip_suffix(b"\r").unwrap_or(&rest[..newline]);
    let id = std::str::from_utf8(id_bytes)
        .map_err(|_| protocol("frame id is not UTF-8"))?
        .to_string();

    Ok(Frame {
        command,
        id,
        body: Bytes::copy_from_slice(&rest[newline + 1..]),
    })
}

/// Next line without its terminator, and the remainder.
fn next_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let newline = data.iter().position(|&b| b == b'\n')?;
    let line = &data[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, &data[newline + 1..]))
}

/// Parse the HTTP/1.x request head carried by a `REQUEST` frame.
pub fn parse_request_head(data: &[u8]) -> Result<RequestHead, WokError> {
    let (request_line, mut rest) =
        next_line(data).ok_or_else(|| protocol("missing request line"))?;
    let request_line =
        std::str::from_utf8(request_line).map_err(|_| protocol("request line is not UTF-8"))?;

    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(protocol(format!("malformed request line: {request_line}")));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(protocol(format!("unsupported version: {version}")));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| protocol(format!("invalid method: {method}")))?;
    let uri: Uri = target
        .parse()
        .map_err(|_| protocol(format!("invalid request target: {target}")))?;

    let mut headers = HeaderMap::new();
    loop {
        let (line, remainder) =
            next_line(rest).ok_or_else(|| protocol("request head is not terminated"))?;
        rest = remainder;
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| protocol("header line without colon"))?;
        let name = HeaderName::from_bytes(&line[..colon])
            .map_err(|_| protocol("invalid header name"))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|_| protocol("invalid header value"))?;
        let _ = headers.append(name, value);
    }

    Ok(RequestHead {
        method,
        uri,
        headers,
    })
}

/// Decode an `EVENT` body. Malformed queries yield empty params.
pub fn parse_event(body: &[u8]) -> Params {
    std::str::from_utf8(body)
        .ok()
        .and_then(|query| Params::from_query(query).ok())
        .unwrap_or_default()
}

/// `RESPONSE` frame.
pub fn encode_response(id: &str, status: u16, headers: &[(String, String)], body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(64 + body.len());
    out.put_slice(format!("RESPONSE {id}\r\nHTTP/1.0 {status}").as_bytes());
    if let Some(reason) = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        out.put_u8(b' ');
        out.put_slice(reason.as_bytes());
    }
    out.put_slice(b"\r\n");
    for (name, value) in headers {
        out.put_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.put_slice(b"\r\n");
    out.put_slice(body);
    out.freeze()
}

/// `APPLY` frame carrying JSON output.
pub fn encode_apply(id: &str, output: &Output) -> Result<Bytes, WokError> {
    Ok(Bytes::from(format!("APPLY {id}\r\n{}", output.to_json()?)))
}

/// `DONE` frame.
pub fn encode_done(id: &str) -> Bytes {
    Bytes::from(format!("DONE {id}\r\n"))
}
