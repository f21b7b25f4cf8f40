use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Missing ERKAO_HTTP_TEST_PORT")]
    MissingPort,
    #[error("Invalid port: {port}")]
    InvalidPort { port: i64 },
    #[error("Invalid port value {value:?}: {source}")]
    PortParse {
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("RequestError: {details:?}")]
    RequestError { details: String },
    #[error("ConnectionClosed")]
    ConnectionClosed,
    #[error("Timeout")]
    Timeout,
    #[error("IOError: {source:?}")]
    IOError {
        #[from]
        source: std::io::Error,
    },
    // from http::Error
    #[error("HttpError: {source:?}")]
    HttpError {
        #[from]
        source: http::Error,
    },
    // from serde_json::Error
    #[error("JsonError: {source:?}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
}
