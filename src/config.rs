use anyhow::Context;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL_ID: &str = "gemini-1.5-flash";

/// Settings resolved once at startup and passed to handlers by reference.
/// A missing DATABASE_URL or GEMINI_API_KEY aborts the process before the
/// server binds.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub model_id: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the clinic Postgres instance")?;
        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY must be set to reach the language model")?;
        let gemini_base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string());
        let model_id =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        Ok(Self {
            database_url,
            gemini_api_key,
            gemini_base_url,
            model_id,
        })
    }
}
