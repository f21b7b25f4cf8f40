use crate::error::FixtureError;
use bytes::{Buf, Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Request, Version};
use httparse::Status;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
#[cfg(feature = "trace")]
use tracing::instrument;

pub const BUF_SIZE: usize = 4096;
pub const HEAD_LIMIT: usize = 16 * 1024;
pub const MAX_HEADERS: usize = 64;
const BODY_CHUNK: usize = 64 * 1024;

/// Reads until a complete request head is buffered. Whatever follows the head
/// stays in `buffer` as the start of the body.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn socket_to_request<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
) -> Result<Request<()>, FixtureError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some((request, head_len)) = parse_request(&buffer[..])? {
            buffer.advance(head_len);
            return Ok(request);
        }
        if buffer.len() >= HEAD_LIMIT {
            return Err(FixtureError::RequestError {
                details: "request head too large".to_string(),
            });
        }
        if socket.read_buf(buffer).await? == 0 {
            return Err(FixtureError::ConnectionClosed);
        }
    }
}

#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub fn parse_request(buf: &[u8]) -> Result<Option<(Request<()>, usize)>, FixtureError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(Status::Complete(head_len)) => {
            let method = req.method.ok_or(FixtureError::RequestError {
                details: "method absent".to_string(),
            })?;
            let path = req.path.ok_or(FixtureError::RequestError {
                details: "path absent".to_string(),
            })?;
            let version = match req.version {
                Some(0) => Version::HTTP_10,
                Some(1) => Version::HTTP_11,
                _ => {
                    return Err(FixtureError::RequestError {
                        details: "unsupported version".to_string(),
                    })
                }
            };

            let mut builder = Request::builder().method(method).uri(path).version(version);
            for header in req.headers.iter() {
                builder = builder.header(header.name, header.value);
            }

            Ok(Some((builder.body(())?, head_len)))
        }
        Ok(Status::Partial) => Ok(None),
        Err(err) => Err(FixtureError::RequestError {
            details: err.to_string(),
        }),
    }
}

/// Declared body length. Absent, unparsable and non-positive values all mean
/// there is no body to read.
pub fn content_length(headers: &HeaderMap) -> usize {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|length| *length > 0)
        .and_then(|length| usize::try_from(length).ok())
        .unwrap_or(0)
}

/// Blocks until `length` body bytes are available. There is no deadline here;
/// wrap the call in [`with_timeout`] to get one.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn read_body<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
    length: usize,
) -> Result<Bytes, FixtureError>
where
    S: AsyncRead + Unpin,
{
    while buffer.len() < length {
        buffer.reserve((length - buffer.len()).min(BODY_CHUNK));
        if socket.read_buf(buffer).await? == 0 {
            return Err(FixtureError::ConnectionClosed);
        }
    }
    Ok(buffer.split_to(length).freeze())
}

pub async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T, FixtureError>
where
    F: Future<Output = Result<T, FixtureError>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| FixtureError::Timeout)?,
    }
}
