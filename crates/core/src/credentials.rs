//! Bearer-token acquisition for Azure data-plane calls.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::process::Command;
use tokio::sync::Mutex;

pub const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
pub const SEARCH_RESOURCE: &str = "https://search.azure.com/";
pub const ACCESS_TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

const REFRESH_MARGIN_SECS: i64 = 60;
/// Lifetime assumed for CLI tokens that carry no parseable expiry.
const ASSUMED_CLI_LIFETIME_MINS: i64 = 55;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now,
            None => true,
        }
    }
}

#[async_trait]
pub trait CredentialProvider {
    /// Returns a bearer token valid for `resource`.
    async fn token(&self, resource: &str) -> Result<AccessToken, CredentialError>;
}

#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenCredential {
    async fn token(&self, _resource: &str) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenOutput {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
    /// Local wall-clock time; the only expiry older CLI releases print.
    #[serde(default, rename = "expiresOn")]
    expires_on_local: Option<String>,
}

fn parse_local_expiry(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

pub(crate) fn parse_cli_token(output: &[u8]) -> Result<AccessToken, CredentialError> {
    let parsed: CliTokenOutput = serde_json::from_slice(output)?;
    let expires_at = parsed
        .expires_on
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .or_else(|| parsed.expires_on_local.as_deref().and_then(parse_local_expiry))
        .unwrap_or_else(|| Utc::now() + Duration::minutes(ASSUMED_CLI_LIFETIME_MINS));

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at: Some(expires_at),
    })
}

/// Uses the signed-in Azure CLI session (`az account get-access-token`).
pub struct AzureCliCredential {
    program: String,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::with_program("az")
    }
}

impl AzureCliCredential {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    async fn token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(resource) {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.clone());
            }
        }

        let output = Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                resource,
                "--output",
                "json",
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(CredentialError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = parse_cli_token(&output.stdout)?;
        tracing::debug!(resource, expires_at = ?token.expires_at, "acquired azure cli token");
        cache.insert(resource.to_string(), token.clone());
        Ok(token)
    }
}

/// Tries each provider in order and returns the first token obtained.
pub struct ChainedCredential {
    providers: Vec<Box<dyn CredentialProvider + Send + Sync>>,
}

impl ChainedCredential {
    pub fn new(providers: Vec<Box<dyn CredentialProvider + Send + Sync>>) -> Self {
        Self { providers }
    }

    /// Environment token first, then the Azure CLI.
    pub fn default_chain() -> Self {
        let mut providers: Vec<Box<dyn CredentialProvider + Send + Sync>> = Vec::new();
        if let Some(env) = StaticTokenCredential::from_env() {
            providers.push(Box::new(env));
        }
        providers.push(Box::new(AzureCliCredential::default()));
        Self::new(providers)
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredential {
    async fn token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.token(resource).await {
                Ok(token) => return Ok(token),
                Err(error) => failures.push(error.to_string()),
            }
        }
        Err(CredentialError::Unavailable(failures.join("; ")))
    }
}
