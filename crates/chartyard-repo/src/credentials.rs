//! Repository credential bundle and the HTTP client built from it
//!
//! Key security features:
//! - Basic auth is only sent to the origin the request started on
//! - NEVER sends credentials after a cross-origin redirect
//! - Client certificates and private CA bundles are applied per repository

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{RepoError, Result};

/// Default timeout for index and chart downloads
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REDIRECTS: u32 = 10;

/// Credentials attached to a repository object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoCredential {
    /// Basic auth user, or access key id for S3 repositories
    pub username: Option<String>,

    /// Basic auth password, or secret access key for S3 repositories
    pub password: Option<String>,

    /// PEM encoded client certificate
    pub cert_data: Option<String>,

    /// PEM encoded client private key
    pub key_data: Option<String>,

    /// PEM encoded CA bundle used to verify the server
    pub ca_data: Option<String>,

    /// Skip server certificate verification (insecure)
    pub insecure_skip_tls_verify: bool,
}

impl RepoCredential {
    /// Basic auth credentials
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Whether no credential material is present at all
    pub fn is_anonymous(&self) -> bool {
        self == &Self::default()
    }

    /// `Authorization` header value, if basic auth is configured
    pub fn auth_header(&self) -> Option<String> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().unwrap_or_default();
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, password));
        Some(format!("Basic {}", encoded))
    }

    /// Build a reqwest client honouring the TLS part of the bundle
    fn build_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            // Redirects are followed manually so credentials never leak cross-origin
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        if let Some(ca) = self.ca_data.as_deref().filter(|s| !s.trim().is_empty()) {
            let certs = reqwest::Certificate::from_pem_bundle(ca.as_bytes()).map_err(|e| {
                RepoError::Tls {
                    message: format!("invalid CA bundle: {}", e),
                }
            })?;
            if certs.is_empty() {
                return Err(RepoError::Tls {
                    message: "CA bundle contains no certificates".to_string(),
                });
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        match (self.cert_data.as_deref(), self.key_data.as_deref()) {
            (Some(cert), Some(key)) if !cert.trim().is_empty() && !key.trim().is_empty() => {
                let mut pem = cert.as_bytes().to_vec();
                pem.push(b'\n');
                pem.extend_from_slice(key.as_bytes());
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::Tls {
                    message: format!("invalid client certificate or key: {}", e),
                })?;
                builder = builder.identity(identity);
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(RepoError::Tls {
                    message: "client certificate and key must be provided together".to_string(),
                });
            }
            _ => {}
        }

        if self.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().map_err(|e| RepoError::Tls {
            message: e.to_string(),
        })
    }
}

/// Check if two URLs are same-origin (for redirect safety)
pub fn same_origin(url1: &str, url2: &str) -> bool {
    match (Url::parse(url1), Url::parse(url2)) {
        (Ok(u1), Ok(u2)) => {
            u1.scheme() == u2.scheme()
                && u1.host() == u2.host()
                && u1.port_or_known_default() == u2.port_or_known_default()
        }
        _ => false,
    }
}

/// HTTP client bound to one credential bundle, with redirect protection
pub struct SecureHttpClient {
    client: reqwest::Client,
    credential: RepoCredential,
}

impl SecureHttpClient {
    /// Create a client for the given credential bundle
    pub fn new(credential: &RepoCredential) -> Result<Self> {
        Self::with_timeout(credential, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(credential: &RepoCredential, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: credential.build_client(timeout)?,
            credential: credential.clone(),
        })
    }

    /// Fetch a URL with secure redirect handling
    ///
    /// SECURITY: Credentials are NEVER sent after cross-origin redirects
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(&current_url);

            if same_origin(url, &current_url) {
                if let Some(auth) = self.credential.auth_header() {
                    request = request.header("Authorization", auth);
                }
            } else {
                tracing::warn!(
                    from = %url,
                    to = %current_url,
                    "Cross-origin redirect - credentials not forwarded"
                );
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }

                let location = response
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                let base = Url::parse(&current_url)?;
                current_url = base.join(location)?.to_string();
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired { url: current_url });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current_url),
                });
            }
            if status == reqwest::StatusCode::NOT_FOUND && current_url.ends_with("/index.yaml") {
                return Err(RepoError::IndexNotFound { url: current_url });
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current_url),
                });
            }

            return Ok(response);
        }
    }

    /// Fetch bytes from URL
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
