use crate::error::FixtureError;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
#[cfg(feature = "trace")]
use tracing::instrument;

pub const PORT_ENV: &str = "ERKAO_HTTP_TEST_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSet {
    /// `/hello` and `/echo`.
    Base,
    /// Adds `GET /json` and verbose startup diagnostics.
    Extended,
}

#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub port: u16,
    pub routes: RouteSet,
    pub access_log: bool,
    pub body_timeout: Option<Duration>,
}

impl FixtureConfig {
    pub fn new(port: u16) -> Self {
        FixtureConfig {
            port,
            routes: RouteSet::Base,
            access_log: false,
            body_timeout: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    pub fn verbose(&self) -> bool {
        self.routes == RouteSet::Extended
    }
}

/// The command-line value wins over the environment; both missing means port 0,
/// which is rejected together with every other non-positive value.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub fn resolve_port(arg: Option<&str>, env: Option<&str>) -> Result<u16, FixtureError> {
    let port = match arg.or(env) {
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|source| FixtureError::PortParse {
                value: value.to_string(),
                source,
            })?,
        None => 0,
    };

    if port <= 0 {
        return Err(FixtureError::MissingPort);
    }
    u16::try_from(port).map_err(|_| FixtureError::InvalidPort { port })
}
