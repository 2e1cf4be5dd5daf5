//! Environment-based configuration.
//!
//! Secrets and endpoints come from environment variables (loadable from a
//! `.env` file); operational tunables are command-line flags on the worker
//! subcommands.

use std::env;

use crate::prelude::*;

/// Read a required environment variable.
fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| anyhow!("{} is not set", name))
}

/// Connection string for the job database.
pub fn database_url() -> Result<String> {
    required_var("DATABASE_URL")
}

/// Configuration for the language-model transport.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,

    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<String>,

    /// The model to use for extraction.
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_base: env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_owned()),
            api_key: env::var("LLM_API_KEY").ok(),
            model: required_var("LLM_MODEL")?,
        })
    }
}

/// Configuration for object storage.
///
/// Exactly one of the two backends must be configured: an HTTP(S) object
/// store reachable at `STORAGE_BASE_URL`, or a local directory at
/// `STORAGE_ROOT` (useful for development).
#[derive(Clone, Debug)]
pub enum StorageConfig {
    Http {
        base_url: String,
        auth_token: Option<String>,
    },
    Fs {
        root: PathBuf,
    },
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        match (env::var("STORAGE_BASE_URL").ok(), env::var("STORAGE_ROOT").ok()) {
            (Some(base_url), None) => Ok(StorageConfig::Http {
                base_url,
                auth_token: env::var("STORAGE_AUTH_TOKEN").ok(),
            }),
            (None, Some(root)) => Ok(StorageConfig::Fs { root: root.into() }),
            (Some(_), Some(_)) => {
                Err(anyhow!("set only one of STORAGE_BASE_URL and STORAGE_ROOT"))
            }
            (None, None) => {
                Err(anyhow!("one of STORAGE_BASE_URL or STORAGE_ROOT must be set"))
            }
        }
    }
}
