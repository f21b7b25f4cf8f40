use crate::error::FixtureError;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use log::info;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
#[cfg(feature = "trace")]
use tracing::instrument;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";

pub fn text_response(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Result<Response<Bytes>, FixtureError> {
    build_response(status, TEXT_PLAIN, body.into())
}

pub fn json_response<T>(status: StatusCode, value: &T) -> Result<Response<Bytes>, FixtureError>
where
    T: Serialize + ?Sized,
{
    let body = to_spaced_json(value)?;
    build_response(status, APPLICATION_JSON, body.into())
}

pub fn error_response(status: StatusCode) -> Result<Response<Bytes>, FixtureError> {
    let msg = match status {
        StatusCode::BAD_REQUEST => "bad request",
        StatusCode::NOT_FOUND => "not found",
        _ => "unknown error",
    };
    text_response(status, msg)
}

// Content-Length is always taken from the body itself, never from the caller.
fn build_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Result<Response<Bytes>, FixtureError> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, body.len())
        .header(CONNECTION, "close")
        .body(body)?)
}

#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn send_response<S>(socket: &mut S, response: Response<Bytes>) -> Result<(), FixtureError>
where
    S: AsyncWrite + Unpin,
{
    let (parts, body) = response.into_parts();

    // Estimate capacity to reduce reallocations
    let mut resp_bytes = Vec::with_capacity(128 + body.len());
    resp_bytes.extend_from_slice(b"HTTP/1.1 ");
    let mut itoa_buf = itoa::Buffer::new();
    resp_bytes.extend_from_slice(itoa_buf.format(parts.status.as_u16()).as_bytes());
    resp_bytes.extend_from_slice(b" ");
    resp_bytes.extend_from_slice(parts.status.canonical_reason().unwrap_or("").as_bytes());
    resp_bytes.extend_from_slice(b"\r\n");

    for (key, value) in parts.headers.iter() {
        resp_bytes.extend_from_slice(key.as_str().as_bytes());
        resp_bytes.extend_from_slice(b": ");
        resp_bytes.extend_from_slice(value.as_bytes());
        resp_bytes.extend_from_slice(b"\r\n");
    }

    resp_bytes.extend_from_slice(b"\r\n");
    resp_bytes.extend_from_slice(&body);

    socket.write_all(&resp_bytes).await?;
    socket.flush().await?;

    Ok(())
}

pub fn log_request_response<T>(request: &Request<T>, status_code: StatusCode) {
    info!(
        "{} {} {}",
        request.method(),
        request.uri(),
        status_code.as_u16()
    );
}

/// Writes `{"a": 1, "b": 2}` rather than serde_json's compact `{"a":1,"b":2}`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

pub fn to_spaced_json<T>(value: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut out = Vec::with_capacity(64);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut ser)?;
    Ok(out)
}
