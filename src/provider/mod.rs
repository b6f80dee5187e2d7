//! Remote resource management: create, poll, and delete droplets.
//!
//! The orchestrator only sees [`ResourceManager`]. Catalog and account calls
//! used by the setup commands live on the concrete [`DigitalOcean`] client.

pub mod digitalocean;

use std::net::IpAddr;

use async_trait::async_trait;
use facet::Facet;

use crate::error::DisposableError;

pub use digitalocean::DigitalOcean;

/// Tag attached to every droplet this tool creates.
pub const DISPOSABLE_TAG: &str = "disposable";

/// Parameters for one droplet creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_key_id: u64,
    pub ipv6: bool,
    pub tags: Vec<String>,
}

impl CreateRequest {
    /// A dual-stack, tagged droplet with a fresh random name.
    pub fn disposable(region: &str, size: &str, image: &str, ssh_key_id: u64) -> Self {
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            region: region.to_string(),
            size: size.to_string(),
            image: image.to_string(),
            ssh_key_id,
            ipv6: true,
            tags: vec![DISPOSABLE_TAG.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Droplet {
    pub id: u64,
    #[facet(default)]
    pub name: String,
    /// `new`, `active`, `off` or `archive`.
    #[facet(default)]
    pub status: String,
    #[facet(default)]
    pub networks: Networks,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Networks {
    #[facet(default)]
    pub v4: Vec<NetworkAddress>,
    #[facet(default)]
    pub v6: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct NetworkAddress {
    #[facet(default)]
    pub ip_address: String,
    /// `public` or `private`.
    #[facet(default)]
    #[facet(rename = "type")]
    pub kind: String,
}

impl Droplet {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// First public address of the requested family.
    pub fn public_address(&self, ipv6: bool) -> Option<IpAddr> {
        let family = if ipv6 {
            &self.networks.v6
        } else {
            &self.networks.v4
        };
        family
            .iter()
            .filter(|n| n.kind == "public")
            .find_map(|n| n.ip_address.parse().ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Region {
    #[facet(default)]
    pub slug: String,
    #[facet(default)]
    pub name: String,
    /// Size slugs offered in this region.
    #[facet(default)]
    pub sizes: Vec<String>,
    #[facet(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Size {
    #[facet(default)]
    pub slug: String,
    /// RAM in MB.
    #[facet(default)]
    pub memory: u64,
    #[facet(default)]
    pub vcpus: u64,
    /// Disk in GB.
    #[facet(default)]
    pub disk: u64,
    #[facet(default)]
    pub price_hourly: f64,
    #[facet(default)]
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Image {
    #[facet(default)]
    pub id: u64,
    #[facet(default)]
    pub slug: Option<String>,
    #[facet(default)]
    pub name: String,
    #[facet(default)]
    pub distribution: String,
    /// RFC 3339, e.g. `2024-06-11T19:18:36Z`.
    #[facet(default)]
    pub created_at: String,
}

/// The newest Debian image with a usable slug.
pub fn latest_debian(images: &[Image]) -> Option<&Image> {
    images
        .iter()
        .filter(|i| i.distribution == "Debian" && i.slug.is_some())
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
}

/// Create, observe and delete droplets.
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    async fn create(&self, request: &CreateRequest) -> Result<Droplet, DisposableError>;

    async fn get(&self, id: u64) -> Result<Droplet, DisposableError>;

    /// Delete a droplet. A 404 or 401 comes back as an `Api` error carrying
    /// that status so callers can tell "already gone" from "token revoked".
    async fn delete(&self, id: u64) -> Result<(), DisposableError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(slug: &str, distribution: &str, created_at: &str) -> Image {
        Image {
            slug: Some(slug.into()),
            distribution: distribution.into(),
            created_at: created_at.into(),
            ..Image::default()
        }
    }

    #[test]
    fn latest_debian_picks_newest() {
        let images = vec![
            image("debian-11-x64", "Debian", "2022-01-10T10:00:00Z"),
            image("debian-12-x64", "Debian", "2024-06-11T19:18:36Z"),
            image("ubuntu-24-04-x64", "Ubuntu", "2025-01-01T00:00:00Z"),
        ];
        assert_eq!(
            latest_debian(&images).and_then(|i| i.slug.as_deref()),
            Some("debian-12-x64")
        );
    }

    #[test]
    fn latest_debian_none_without_debian() {
        let images = vec![image("fedora-40-x64", "Fedora", "2024-01-01T00:00:00Z")];
        assert!(latest_debian(&images).is_none());
    }

    #[test]
    fn public_address_skips_private_entries() {
        let droplet = Droplet {
            networks: Networks {
                v4: vec![
                    NetworkAddress {
                        ip_address: "10.0.0.5".into(),
                        kind: "private".into(),
                    },
                    NetworkAddress {
                        ip_address: "203.0.113.7".into(),
                        kind: "public".into(),
                    },
                ],
                v6: vec![NetworkAddress {
                    ip_address: "2001:db8::7".into(),
                    kind: "public".into(),
                }],
            },
            ..Droplet::default()
        };
        assert_eq!(
            droplet.public_address(false),
            Some("203.0.113.7".parse().unwrap())
        );
        assert_eq!(
            droplet.public_address(true),
            Some("2001:db8::7".parse().unwrap())
        );
    }

    #[test]
    fn disposable_request_is_tagged_and_dual_stack() {
        let a = CreateRequest::disposable("nyc3", "s-1vcpu-1gb", "debian-12-x64", 9);
        let b = CreateRequest::disposable("nyc3", "s-1vcpu-1gb", "debian-12-x64", 9);
        assert!(a.ipv6);
        assert_eq!(a.tags, vec![DISPOSABLE_TAG]);
        assert_ne!(a.name, b.name);
    }
}
