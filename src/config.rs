use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::{env, fs};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Public base URL used when building share links.
    pub base_url: String,
    pub address: IpAddr,
    pub port: u16,
    /// Honour the `x-test-now-ms` header. Never enable in production.
    pub test_mode: bool,
    pub database: Database,
    pub cors: Cors,
    pub limits: Limits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Cors {
    /// Origin of the paste creation frontend. Any origin is allowed when unset.
    pub frontend_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_content_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: local_base_url(3000),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            test_mode: false,
            database: Database::default(),
            cors: Cors::default(),
            limits: Limits::default(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Database {
            url: "sqlite://pastes.db?mode=rwc".to_owned(),
            max_connections: 5,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_content_size: 1024 * 1024,
        }
    }
}

fn local_base_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

impl Config {
    /// Load the config file at `path` (if any) and apply environment overrides.
    ///
    /// A missing file is only an error when `required` is set.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(source) => Self::from_toml(&source)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(source)?;
        if config.base_url == Config::default().base_url {
            config.base_url = local_base_url(config.port);
        }
        config.normalize();
        Ok(config)
    }

    /// Override fields from `PORT`, `DATABASE_URL`, `BASE_URL`,
    /// `FRONTEND_URL` and `TEST_MODE`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        // share links follow the port unless a base URL was chosen explicitly
        let derived_base_url = self.base_url == local_base_url(self.port);
        if let Some(port) = var("PORT") {
            self.port = port.parse().context("invalid PORT")?;
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = url;
        }
        match var("BASE_URL") {
            Some(base_url) => self.base_url = base_url,
            None if derived_base_url => self.base_url = local_base_url(self.port),
            None => {}
        }
        if let Some(origin) = var("FRONTEND_URL") {
            self.cors.frontend_origin = Some(origin).filter(|o| !o.is_empty());
        }
        if let Some(test_mode) = var("TEST_MODE") {
            self.test_mode = matches!(test_mode.as_str(), "1" | "true");
        }
        self.normalize();
        Ok(())
    }

    fn normalize(&mut self) {
        let trimmed = self.base_url.trim_end_matches('/').len();
        self.base_url.truncate(trimmed);
    }

    /// Where "create a new paste" links point.
    pub fn frontend_url(&self) -> &str {
        self.cors.frontend_origin.as_deref().unwrap_or("/")
    }
}
