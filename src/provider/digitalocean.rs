use std::time::Duration;

use async_trait::async_trait;
use facet::Facet;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};

use super::{CreateRequest, Droplet, Image, Region, ResourceManager, Size};
use crate::error::DisposableError;

pub const API_BASE: &str = "https://api.digitalocean.com/v2";

/// Deadline for every control-plane call.
pub const API_TIMEOUT: Duration = Duration::from_secs(10);

const PAGE_SIZE: &str = "200";

// ── Wire types ───────────────────────────────────────────

#[derive(Default, Facet)]
#[facet(default)]
struct DropletEnvelope {
    #[facet(default)]
    droplet: Droplet,
}

#[derive(Default, Facet)]
#[facet(default)]
struct RegionsEnvelope {
    #[facet(default)]
    regions: Vec<Region>,
}

#[derive(Default, Facet)]
#[facet(default)]
struct SizesEnvelope {
    #[facet(default)]
    sizes: Vec<Size>,
}

#[derive(Default, Facet)]
#[facet(default)]
struct ImagesEnvelope {
    #[facet(default)]
    images: Vec<Image>,
}

#[derive(Default, Facet)]
#[facet(default)]
struct KeyEnvelope {
    #[facet(default)]
    ssh_key: KeyInfo,
}

#[derive(Default, Facet)]
#[facet(default)]
struct KeyInfo {
    #[facet(default)]
    id: u64,
}

#[derive(Default, Facet)]
#[facet(default)]
struct ErrorBody {
    #[facet(default)]
    message: String,
}

#[derive(Facet)]
struct CreateDropletBody {
    name: String,
    region: String,
    size: String,
    image: String,
    ssh_keys: Vec<u64>,
    ipv6: bool,
    tags: Vec<String>,
}

#[derive(Facet)]
struct CreateKeyBody {
    name: String,
    public_key: String,
}

// ── Client ───────────────────────────────────────────────

/// DigitalOcean API v2 client authenticated with a personal access token.
pub struct DigitalOcean {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl DigitalOcean {
    pub fn new(token: &str) -> Result<Self, DisposableError> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: &str, base: &str) -> Result<Self, DisposableError> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(concat!("disposable/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base))
            .bearer_auth(&self.token)
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<String, DisposableError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        tracing::debug!(%status, body = %body.trim(), "API call failed");
        Err(DisposableError::Api {
            status: status.as_u16(),
            message: api_message(status, &body),
        })
    }

    pub async fn list_regions(&self) -> Result<Vec<Region>, DisposableError> {
        let request = self
            .request(Method::GET, "/regions")
            .query(&[("per_page", PAGE_SIZE)]);
        let body = self.send(request).await?;
        let envelope: RegionsEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        Ok(envelope.regions)
    }

    pub async fn list_sizes(&self) -> Result<Vec<Size>, DisposableError> {
        let request = self
            .request(Method::GET, "/sizes")
            .query(&[("per_page", PAGE_SIZE)]);
        let body = self.send(request).await?;
        let envelope: SizesEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        Ok(envelope.sizes)
    }

    pub async fn list_distribution_images(&self) -> Result<Vec<Image>, DisposableError> {
        let request = self
            .request(Method::GET, "/images")
            .query(&[("type", "distribution"), ("per_page", PAGE_SIZE)]);
        let body = self.send(request).await?;
        let envelope: ImagesEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        Ok(envelope.images)
    }

    /// Cheapest authenticated call available; a 401 means the token is bad.
    pub async fn validate_token(&self) -> Result<(), DisposableError> {
        let request = self.request(Method::GET, "/tags").query(&[("per_page", "1")]);
        self.send(request).await?;
        Ok(())
    }

    /// Upload a public key and return its id.
    pub async fn create_key(&self, name: &str, public_key: &str) -> Result<u64, DisposableError> {
        let payload = facet_json::to_string(&CreateKeyBody {
            name: name.to_string(),
            public_key: public_key.to_string(),
        })
        .map_err(decode_error)?;
        let request = self
            .request(Method::POST, "/account/keys")
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let body = self.send(request).await?;
        let envelope: KeyEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        Ok(envelope.ssh_key.id)
    }
}

#[async_trait]
impl ResourceManager for DigitalOcean {
    async fn create(&self, request: &CreateRequest) -> Result<Droplet, DisposableError> {
        let payload = facet_json::to_string(&CreateDropletBody {
            name: request.name.clone(),
            region: request.region.clone(),
            size: request.size.clone(),
            image: request.image.clone(),
            ssh_keys: vec![request.ssh_key_id],
            ipv6: request.ipv6,
            tags: request.tags.clone(),
        })
        .map_err(decode_error)?;
        let builder = self
            .request(Method::POST, "/droplets")
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let body = self.send(builder).await?;
        let envelope: DropletEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        tracing::info!(id = envelope.droplet.id, name = %request.name, "droplet created");
        Ok(envelope.droplet)
    }

    async fn get(&self, id: u64) -> Result<Droplet, DisposableError> {
        let body = self
            .send(self.request(Method::GET, &format!("/droplets/{id}")))
            .await?;
        let envelope: DropletEnvelope = facet_json::from_str(&body).map_err(decode_error)?;
        Ok(envelope.droplet)
    }

    async fn delete(&self, id: u64) -> Result<(), DisposableError> {
        self.send(self.request(Method::DELETE, &format!("/droplets/{id}")))
            .await?;
        Ok(())
    }
}

fn decode_error(e: impl std::fmt::Display) -> DisposableError {
    DisposableError::Decode {
        message: e.to_string(),
    }
}

/// Human-readable message for a failed call: the API's own message when the
/// body carries one, otherwise the status reason.
fn api_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<ErrorBody> = facet_json::from_str(body).ok();
    match parsed {
        Some(err) if !err.message.is_empty() => err.message,
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string(),
    }
}
