use anyhow::{Context, Result};
use std::env;
use std::path::Path;

/// Default completion model. The legacy completions endpoint only serves
/// instruct models.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo-instruct";

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_model: String,
    /// Bearer token for X's web API. Falls back to the public web-client token.
    pub x_bearer_token: Option<String>,
    /// Login credentials are accepted but guest mode never uses them.
    pub x_username: Option<String>,
    pub x_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let openai_api_key = env::var("OPENAI_API_KEY").context(
            "OPENAI_API_KEY not found.\n\n\
                To fix this, create ~/.config/post-labeler/.env with:\n  \
                OPENAI_API_KEY=your_key_here\n\n\
                Get your OpenAI API key from: https://platform.openai.com/api-keys",
        )?;

        let openai_model =
            optional_var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());

        Ok(Self {
            openai_api_key,
            openai_model,
            x_bearer_token: optional_var("X_BEARER_TOKEN"),
            x_username: optional_var("X_USERNAME"),
            x_password: optional_var("X_PASSWORD"),
        })
    }

    /// True when both login credentials are present.
    pub fn has_x_login(&self) -> bool {
        self.x_username.is_some() && self.x_password.is_some()
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/post-labeler/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("post-labeler").join(".env");
            if load_env_file(&config_path) {
                return;
            }
        }

        // 3. ~/.env
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            load_env_file(&home_path);
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

/// Loads `path` into the environment. Missing files are skipped quietly,
/// unreadable or malformed ones are logged.
fn load_env_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Skipping {}: {}", path.display(), e);
            false
        }
    }
}

/// Reads an env var, treating empty values as unset.
fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
