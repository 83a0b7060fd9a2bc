use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::model::{Permission, Role};

#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(about = "Runs the lectern catalog, library and blog service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve HTTP (the default when no subcommand is given)
    Serve,
    /// Grant a named permission to a user
    Grant { username: String, permission: Permission },
    /// Revoke a named permission from a user
    Revoke { username: String, permission: Permission },
    /// Replace a user's role
    SetRole { username: String, role: Role },
    /// Relationship lookups over the library schema
    Query {
        #[command(subcommand)]
        query: LibraryQuery,
    },
}

#[derive(Subcommand, Debug)]
pub enum LibraryQuery {
    /// All books written by the named author
    BooksByAuthor { author: String },
    /// All books held by the named library
    BooksInLibrary { library: String },
    /// The librarian running the named library
    Librarian { library: String },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lectern")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: u16,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_token_ttl_hours() -> i64 {
    24 * 14
}

fn default_page_size() -> u32 {
    10
}

fn default_sync_interval() -> u64 {
    60
}

impl Default for App {
    fn default() -> Self {
        App {
            database: ":memory:".to_owned(),
            port: 8000,
            token_ttl_hours: default_token_ttl_hours(),
            page_size: default_page_size(),
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub app: App,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    /// Configuration for tests and throwaway runs: in-memory database.
    pub fn in_memory() -> Self {
        Config::default()
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        if config.app.page_size == 0 {
            anyhow::bail!("app.page_size must be positive");
        }
        if config.app.token_ttl_hours <= 0 {
            anyhow::bail!("app.token_ttl_hours must be positive");
        }
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            let Some(end) = result[actual_start..].find('}') else {
                break;
            };
            let var_name = &result[actual_start + 2..actual_start + end];

            // ${VAR:-default}
            let env_value = if let Some(default_start) = var_name.find(":-") {
                let actual_var = &var_name[..default_start];
                let default_val = &var_name[default_start + 2..];
                env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
            } else {
                env::var(var_name).unwrap_or_else(|_| {
                    tracing::warn!(variable = var_name, "environment variable not set");
                    String::new()
                })
            };

            result.replace_range(actual_start..actual_start + end + 1, &env_value);
            offset = actual_start + env_value.len();
        }

        Ok(result)
    }
}
