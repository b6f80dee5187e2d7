//! Interactive setup: `auth`, `setregion` and `setsize`.

use std::fmt;
use std::path::Path;

use inquire::validator::Validation;
use inquire::{Password, PasswordDisplayMode, Select};

use crate::config::{self, Config, SessionConfig};
use crate::context::AppContext;
use crate::error::DisposableError;
use crate::paths;
use crate::progress;
use crate::provider::{DigitalOcean, Region, Size};

/// Region the selector starts on.
pub const DEFAULT_REGION: &str = "nyc3";

// ── choices ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RegionChoice {
    pub slug: String,
    pub name: String,
}

impl fmt::Display for RegionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.slug)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeChoice {
    pub slug: String,
    pub memory: u64,
    pub vcpus: u64,
    pub disk: u64,
    pub price_hourly: f64,
}

impl fmt::Display for SizeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} GB storage/{} vCPUs/{} MB RAM/${} per hour [{}]",
            self.disk, self.vcpus, self.memory, self.price_hourly, self.slug
        )
    }
}

/// Available regions, in API order.
pub fn region_choices(regions: &[Region]) -> Vec<RegionChoice> {
    regions
        .iter()
        .filter(|r| r.available)
        .map(|r| RegionChoice {
            slug: r.slug.clone(),
            name: r.name.clone(),
        })
        .collect()
}

/// Available sizes offered by `region`, in API order.
pub fn size_choices(sizes: &[Size], region: Option<&Region>) -> Vec<SizeChoice> {
    sizes
        .iter()
        .filter(|s| s.available)
        .filter(|s| region.is_none_or(|r| r.sizes.contains(&s.slug)))
        .map(|s| SizeChoice {
            slug: s.slug.clone(),
            memory: s.memory,
            vcpus: s.vcpus,
            disk: s.disk,
            price_hourly: s.price_hourly,
        })
        .collect()
}

fn starting_cursor(choices: &[RegionChoice], slug: &str) -> usize {
    choices.iter().position(|c| c.slug == slug).unwrap_or(0)
}

// ── key material ─────────────────────────────────────────

pub struct GeneratedKey {
    /// OpenSSH private key, LF line endings.
    pub private_openssh: String,
    pub public_openssh: String,
}

pub fn generate_key() -> Result<GeneratedKey, DisposableError> {
    let key = ssh_key::PrivateKey::random(&mut rand_core::OsRng, ssh_key::Algorithm::Ed25519)
        .map_err(key_error)?;
    let private_openssh = key.to_openssh(ssh_key::LineEnding::LF).map_err(key_error)?;
    let public_openssh = key.public_key().to_openssh().map_err(key_error)?;
    Ok(GeneratedKey {
        private_openssh: private_openssh.as_str().to_owned(),
        public_openssh,
    })
}

fn key_error(e: ssh_key::Error) -> DisposableError {
    DisposableError::Key {
        message: e.to_string(),
    }
}

/// Name the uploaded key is listed under in the account.
pub fn key_name() -> String {
    format!("disposable [{}]", uuid::Uuid::new_v4())
}

// ── public entry points ──────────────────────────────────

/// `disposable auth`: store a working token. On first run, also pick a
/// region and size and register a fresh key pair.
pub async fn run_auth(config_path: &Path) -> Result<(), DisposableError> {
    let (token, api) = prompt_token().await?;

    match config::load_config(config_path) {
        Ok(mut system) => {
            system.config.token = token;
            system.save()?;
            println!("Token updated.");
            return Ok(());
        }
        Err(DisposableError::NotConfigured { .. }) => {}
        Err(e) => return Err(e),
    }

    let region = prompt_region(&api).await?;
    let size = prompt_size(&api, &region).await?;

    let key = generate_key()?;
    let key_id = progress::spin(
        "Uploading SSH key",
        api.create_key(&key_name(), &key.public_openssh),
    )
    .await?;

    config::save_private_key(&paths::ssh_key_path(config_path), &key.private_openssh)?;
    let config = Config {
        token,
        region,
        size,
        key_id,
        session: SessionConfig::default(),
    };
    config::save_config(config_path, &config)?;
    println!("Configuration saved to {}", config_path.display());
    Ok(())
}

/// `disposable setregion`
pub async fn run_set_region(ctx: &mut AppContext) -> Result<(), DisposableError> {
    let region = prompt_region(&ctx.api).await?;
    ctx.system.config.region = region;
    ctx.system.save()?;
    println!("Default region set to {}.", ctx.system.config.region);
    Ok(())
}

/// `disposable setsize`: sizes are limited to the configured region.
pub async fn run_set_size(ctx: &mut AppContext) -> Result<(), DisposableError> {
    let region = ctx.system.config.region.clone();
    let size = prompt_size(&ctx.api, &region).await?;
    ctx.system.config.size = size;
    ctx.system.save()?;
    println!("Default size set to {}.", ctx.system.config.size);
    Ok(())
}

// ── prompts ──────────────────────────────────────────────

async fn prompt_token() -> Result<(String, DigitalOcean), DisposableError> {
    loop {
        let token = Password::new("DigitalOcean API token:")
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .with_validator(|input: &str| {
                if input.trim().is_empty() {
                    Ok(Validation::Invalid("The token must not be empty".into()))
                } else {
                    Ok(Validation::Valid)
                }
            })
            .prompt()
            .map_err(map_inquire_err)?;
        let token = token.trim().to_string();

        let api = DigitalOcean::new(&token)?;
        match progress::spin("Checking token", api.validate_token()).await {
            Ok(()) => return Ok((token, api)),
            Err(e) if e.is_unauthorized() => {
                eprintln!("That token was rejected. Please try again.");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn prompt_region(api: &DigitalOcean) -> Result<String, DisposableError> {
    let regions = progress::spin("Fetching regions", api.list_regions()).await?;
    let choices = region_choices(&regions);
    if choices.is_empty() {
        return Err(DisposableError::Validation {
            message: "no regions are available".into(),
        });
    }
    let cursor = starting_cursor(&choices, DEFAULT_REGION);

    let choice = Select::new("Region:", choices)
        .with_starting_cursor(cursor)
        .with_help_message("Where new droplets are created")
        .prompt()
        .map_err(map_inquire_err)?;
    Ok(choice.slug)
}

async fn prompt_size(api: &DigitalOcean, region: &str) -> Result<String, DisposableError> {
    let (regions, sizes) = progress::spin("Fetching sizes", async {
        Ok::<_, DisposableError>((api.list_regions().await?, api.list_sizes().await?))
    })
    .await?;
    let region = regions.iter().find(|r| r.slug == region);
    let choices = size_choices(&sizes, region);
    if choices.is_empty() {
        return Err(DisposableError::Validation {
            message: "no sizes are available in this region".into(),
        });
    }

    let choice = Select::new("Size:", choices)
        .with_help_message("Billed per hour while the droplet exists")
        .prompt()
        .map_err(map_inquire_err)?;
    Ok(choice.slug)
}

// ── error mapping ────────────────────────────────────────

fn map_inquire_err(e: inquire::InquireError) -> DisposableError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            DisposableError::SetupCancelled
        }
        other => DisposableError::Prompt {
            message: other.to_string(),
        },
    }
}

// ── tests ────────────────────────────────────────────────
