use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            http_addr: std::env::var("HTTP_ADDR")
                .unwrap_or_else(|_| default_http_addr.to_string()),
        })
    }

    /// Workers consume the bus and the database but never bind a socket.
    pub fn worker_from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            http_addr: String::new(),
        })
    }
}

fn required(name: &'static str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is required"))
}
