//! HTTP client for the Axis VAPIX control API.

use digest_auth::AuthContext;
use reqwest::header::{AUTHORIZATION, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::DeviceConfig;
use crate::scrape::ScrapeRequest;

/// Parameter listing, used to identify the device model.
pub const PARAMETER_LIST_API: &str = "/axis-cgi/param.cgi?action=list";

/// Temperature sensor and heater status.
pub const TEMPERATURE_API: &str = "/axis-cgi/temperaturecontrol.cgi?action=statusall";

/// Errors talking to a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("Digest authentication with {url} failed: {message}")]
    Auth { url: String, message: String },
}

/// Client for fetching VAPIX responses.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct AxisClient {
    http: Client,
}

impl AxisClient {
    /// Build a client with the configured timeout and TLS policy.
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(DeviceError::Client)?;

        Ok(Self { http })
    }

    /// GET `path` on the target device, answering a Digest challenge if one is issued.
    pub async fn fetch(&self, target: &ScrapeRequest, path: &str) -> Result<String, DeviceError> {
        let url = target.url(path);
        let request_error = |source| DeviceError::Request {
            url: url.clone(),
            source,
        };

        trace!(url = %url, "Fetching device endpoint");
        let mut response = self.http.get(&url).send().await.map_err(request_error)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge =
                digest_challenge(response.headers()).ok_or_else(|| DeviceError::Auth {
                    url: url.clone(),
                    message: "401 without a Digest WWW-Authenticate challenge".to_string(),
                })?;

            let authorization =
                digest_authorization(challenge, &target.user, &target.password, path).map_err(
                    |e| DeviceError::Auth {
                        url: url.clone(),
                        message: e.to_string(),
                    },
                )?;

            debug!(url = %url, "Answering digest challenge");
            response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, authorization)
                .send()
                .await
                .map_err(request_error)?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status {
                url: url.clone(),
                status,
            });
        }

        response.text().await.map_err(request_error)
    }
}

/// First `WWW-Authenticate` challenge using the Digest scheme.
///
/// Cameras may offer Basic alongside Digest, in either order.
fn digest_challenge(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| {
            v.trim_start()
                .get(..6)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
        })
}

/// Compute the `Authorization` header answering a Digest challenge.
fn digest_authorization(
    challenge: &str,
    user: &str,
    password: &str,
    uri: &str,
) -> Result<String, digest_auth::Error> {
    let mut prompt = digest_auth::parse(challenge)?;
    let context = AuthContext::new(user, password, uri);
    Ok(prompt.respond(&context)?.to_header_string())
}
