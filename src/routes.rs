use crate::config::{FixtureConfig, RouteSet};
use crate::error::FixtureError;
use crate::request::{content_length, read_body, with_timeout};
use crate::response::{error_response, json_response, text_response};
use bytes::{Bytes, BytesMut};
use http::uri::PathAndQuery;
use http::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;
use tokio::io::AsyncRead;
#[cfg(feature = "trace")]
use tracing::instrument;

pub const ECHO_PREFIX: &str = "echo: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Hello,
    Json,
    Echo,
    NotFound,
}

#[derive(Serialize)]
struct Greeting {
    message: &'static str,
    count: u32,
}

/// Exact match on method and request target. Query strings are part of the
/// target, and absolute-form targets never match.
pub fn route(method: &Method, target: &Uri, routes: RouteSet) -> Route {
    if target.scheme().is_some() || target.authority().is_some() {
        return Route::NotFound;
    }
    let path = target.path_and_query().map_or("", PathAndQuery::as_str);

    match (method, path) {
        (&Method::GET, "/hello") => Route::Hello,
        (&Method::GET, "/json") if routes == RouteSet::Extended => Route::Json,
        (&Method::POST, "/echo") | (&Method::PUT, "/echo") => Route::Echo,
        _ => Route::NotFound,
    }
}

/// Produces the response for `request`. The echo route is the only one that
/// reads past the request head.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn handle<S>(
    socket: &mut S,
    buffer: &mut BytesMut,
    request: &Request<()>,
    config: &FixtureConfig,
) -> Result<Response<Bytes>, FixtureError>
where
    S: AsyncRead + Unpin,
{
    match route(request.method(), request.uri(), config.routes) {
        Route::Hello => text_response(StatusCode::OK, "hello"),
        Route::Json => json_response(
            StatusCode::OK,
            &Greeting {
                message: "hello",
                count: 2,
            },
        ),
        Route::Echo => {
            let length = content_length(request.headers());
            let body = if length == 0 {
                Bytes::new()
            } else {
                with_timeout(config.body_timeout, read_body(socket, buffer, length)).await?
            };
            text_response(StatusCode::OK, echo_body(&body))
        }
        Route::NotFound => error_response(StatusCode::NOT_FOUND),
    }
}

/// Invalid UTF-8 sequences come back as U+FFFD.
pub fn echo_body(body: &[u8]) -> String {
    let mut out = String::with_capacity(ECHO_PREFIX.len() + body.len());
    out.push_str(ECHO_PREFIX);
    out.push_str(&String::from_utf8_lossy(body));
    out
}
