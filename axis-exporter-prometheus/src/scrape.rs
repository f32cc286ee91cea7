//! Scrape request validation and the per-request device pipeline.

use std::fmt;
use std::str::FromStr;

use axis_common::flatkey::{self, ParseError};
use thiserror::Error;
use tracing::debug;

use crate::config::Credentials;
use crate::device::{AxisClient, DeviceError, PARAMETER_LIST_API, TEMPERATURE_API};
use crate::mapping::{
    MappingError, MetricObservation, extract_readings, identify_device, to_observations,
};

/// Invalid or missing scrape parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid parameter '{name}' = {value:?}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Everything that can end a scrape without metrics.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Malformed device response: {0}")]
    Parse(#[from] ParseError),

    #[error("Unexpected device response: {0}")]
    Mapping(#[from] MappingError),
}

/// URL scheme used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(())
        }
    }
}

/// A validated scrape target with resolved credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub user: String,
    pub password: String,
}

impl ScrapeRequest {
    /// Validate query parameters into a scrape request.
    ///
    /// `camera_host`, `camera_port` and `camera_proto` always come from the
    /// query. `camera_user` and `camera_password` come from `credentials`
    /// when set there, otherwise from the query. Empty values count as
    /// missing and the first occurrence of a repeated parameter is used.
    pub fn resolve(
        params: &[(String, String)],
        credentials: &Credentials,
    ) -> Result<Self, ValidationError> {
        let host = required(params, "camera_host")?;

        let port_raw = required(params, "camera_port")?;
        let port = match port_raw.parse::<u16>() {
            Ok(0) | Err(_) => {
                return Err(ValidationError::InvalidParameter {
                    name: "camera_port",
                    value: port_raw.to_string(),
                    reason: "expected a port number between 1 and 65535",
                });
            }
            Ok(port) => port,
        };

        let proto_raw = required(params, "camera_proto")?;
        let scheme = proto_raw
            .parse::<Scheme>()
            .map_err(|_| ValidationError::InvalidParameter {
                name: "camera_proto",
                value: proto_raw.to_string(),
                reason: "expected http or https",
            })?;

        let user = match &credentials.username {
            Some(user) => user.clone(),
            None => required(params, "camera_user")?.to_string(),
        };
        let password = match &credentials.password {
            Some(password) => password.clone(),
            None => required(params, "camera_password")?.to_string(),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            scheme,
            user,
            password,
        })
    }

    /// `{proto}://{host}:{port}` of the device.
    pub fn base_url(&self) -> String {
        // Bare IPv6 literals need brackets in a URL authority
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }

    /// Full URL of a device API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl fmt::Debug for ScrapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn required<'a>(
    params: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    params
        .iter()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.as_str())
        .ok_or(ValidationError::MissingParameter(name))
}

/// Fetch identity and status from the device and map them to observations.
pub async fn scrape_device(
    client: &AxisClient,
    request: &ScrapeRequest,
) -> Result<Vec<MetricObservation>, ScrapeError> {
    let body = client.fetch(request, PARAMETER_LIST_API).await?;
    let identity = identify_device(&flatkey::parse(&body)?)?;
    debug!(
        host = %request.host,
        product = %identity.product_name,
        "Identified device"
    );

    let body = client.fetch(request, TEMPERATURE_API).await?;
    let readings = extract_readings(&flatkey::parse(&body)?)?;
    debug!(
        host = %request.host,
        sensors = readings.sensors.len(),
        heaters = readings.heaters.len(),
        "Read device status"
    );

    Ok(to_observations(&identity, &request.host, &readings))
}
