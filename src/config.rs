use anyhow::Result;
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use std::env;

use crate::http::{GraphClient, HttpTransport, RetryTransport};

pub const DEFAULT_API_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v19.0";

/// Environment variable holding the access token.
pub const ACCESS_TOKEN_ENV: &str = "FB_ACCESS_TOKEN";

pub struct Config {
    pub client: Client,
    pub api_url: String,
    pub api_version: String,
}

impl Config {
    /// Builds the configuration, taking the access token from `FB_ACCESS_TOKEN`.
    pub fn new(api_url: Option<String>, api_version: Option<String>) -> Result<Self> {
        let token = env::var(ACCESS_TOKEN_ENV).ok();
        Self::with_token(token.as_deref(), api_url, api_version)
    }

    pub fn with_token(
        token: Option<&str>,
        api_url: Option<String>,
        api_version: Option<String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
            debug!("Using {} for authentication: {}", ACCESS_TOKEN_ENV, mask(token));
        }

        let client = Client::builder()
            .user_agent(concat!("fbgraph/", env!("FBGRAPH_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_version: api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }

    /// Returns a Graph API client that retries through this configuration's HTTP client.
    pub fn graph_client(&self) -> GraphClient {
        let transport = RetryTransport::new(HttpTransport::new(self.client.clone()));
        GraphClient::new(transport, &self.api_url, &self.api_version)
    }
}

/// Keeps only the ends of a secret for log output.
fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
