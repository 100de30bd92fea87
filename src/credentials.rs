//! Connection credentials
//!
//! Distributed SQL services usually authenticate with short-lived tokens
//! rather than fixed passwords. The store only needs "something that hands
//! out a secret valid until some instant", so that is all
//! [`CredentialProvider`] asks for.
//!
//! - [`StaticCredential`]: fixed password, never expires
//! - [`CommandCredential`]: runs an external token generator
//! - [`CachedCredentials`]: serves a cached credential until shortly before
//!   it expires, then refreshes it once for all concurrent callers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::StoreConfig;

/// How long before expiry a cached credential is considered stale
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to run token command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("token command `{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("token command `{0}` produced an empty token")]
    EmptyToken(String),

    #[error("no credential configured")]
    Missing,
}

/// A secret valid until `expires_at` (`None` = never expires)
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// Keep secrets out of logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// True once `now` is within `margin` of expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
                now + margin >= expires_at
            }
        }
    }
}

/// Produces connection credentials valid for a bounded time
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential, CredentialError>;
}

/// Fixed password from configuration
#[derive(Clone)]
pub struct StaticCredential {
    secret: String,
}

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        Ok(Credential::new(self.secret.clone(), None))
    }
}

/// Token produced by an external command's stdout, e.g.
/// `aws dsql generate-db-connect-admin-auth-token --hostname <endpoint>`.
#[derive(Debug, Clone)]
pub struct CommandCredential {
    program: String,
    args: Vec<String>,
    lifetime: Duration,
}

impl CommandCredential {
    /// `command[0]` is the program, the rest are its arguments
    pub fn new(command: &[String], lifetime: Duration) -> Result<Self, CredentialError> {
        let (program, args) = command.split_first().ok_or(CredentialError::Missing)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            lifetime,
        })
    }
}

#[async_trait]
impl CredentialProvider for CommandCredential {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        let issued_at = Utc::now();
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|source| CredentialError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CredentialError::CommandFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::EmptyToken(self.program.clone()));
        }

        let lifetime = chrono::Duration::from_std(self.lifetime).unwrap_or(chrono::Duration::zero());
        tracing::info!(program = %self.program, lifetime_secs = self.lifetime.as_secs(), "generated connection token");
        Ok(Credential::new(token, Some(issued_at + lifetime)))
    }
}

/// Caching wrapper: one refresh per expiry window, shared by all callers
pub struct CachedCredentials<P> {
    provider: P,
    margin: Duration,
    cached: RwLock<Option<Credential>>,
}

impl<P: CredentialProvider> CachedCredentials<P> {
    pub fn new(provider: P) -> Self {
        Self::with_margin(provider, DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_margin(provider: P, margin: Duration) -> Self {
        Self {
            provider,
            margin,
            cached: RwLock::new(None),
        }
    }

    fn fresh(&self, cred: &Option<Credential>) -> Option<Credential> {
        cred.as_ref()
            .filter(|c| !c.needs_refresh(Utc::now(), self.margin))
            .cloned()
    }
}

#[async_trait]
impl<P: CredentialProvider> CredentialProvider for CachedCredentials<P> {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        if let Some(cred) = self.fresh(&*self.cached.read().await) {
            return Ok(cred);
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cred) = self.fresh(&cached) {
            return Ok(cred);
        }

        let cred = self.provider.credential().await?;
        tracing::debug!(expires_at = ?cred.expires_at, "credential refreshed");
        *cached = Some(cred.clone());
        Ok(cred)
    }
}

/// Provider for a store section: a cached token command when one is
/// configured, otherwise the fixed password (empty when none is set).
pub fn for_store(config: &StoreConfig) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    if let Some(command) = config.resolved_token_command() {
        let lifetime = Duration::from_secs(config.token_lifetime_secs);
        let provider = CommandCredential::new(&command, lifetime)?;
        return Ok(Arc::new(CachedCredentials::new(provider)));
    }
    Ok(Arc::new(StaticCredential::new(
        config.password.clone().unwrap_or_default(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Issues `token-N` valid for `lifetime`, counting calls
    struct CountingProvider {
        calls: Arc<AtomicU32>,
        lifetime: chrono::Duration,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn credential(&self) -> Result<Credential, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::new(
                format!("token-{n}"),
                Some(Utc::now() + self.lifetime),
            ))
        }
    }

    #[test]
    fn test_needs_refresh_margin() {
        let now = Utc::now();
        let cred = Credential::new("x", Some(now + chrono::Duration::minutes(10)));
        assert!(!cred.needs_refresh(now, Duration::from_secs(300)));
        assert!(cred.needs_refresh(now + chrono::Duration::minutes(6), Duration::from_secs(300)));

        let forever = Credential::new("x", None);
        assert!(!forever.needs_refresh(now, Duration::from_secs(300)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = Credential::new("hunter2", None);
        assert!(!format!("{cred:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_cached_credentials_reuse_until_margin() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CachedCredentials::new(CountingProvider {
            calls: calls.clone(),
            lifetime: chrono::Duration::minutes(15),
        });

        assert_eq!(cache.credential().await.unwrap().secret, "token-1");
        assert_eq!(cache.credential().await.unwrap().secret, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_credentials_refresh_inside_margin() {
        let calls = Arc::new(AtomicU32::new(0));
        // Lifetime shorter than the margin: every call refreshes
        let cache = CachedCredentials::new(CountingProvider {
            calls: calls.clone(),
            lifetime: chrono::Duration::minutes(2),
        });

        assert_eq!(cache.credential().await.unwrap().secret, "token-1");
        assert_eq!(cache.credential().await.unwrap().secret, "token-2");
    }

    #[tokio::test]
    async fn test_command_credential_reads_stdout() {
        let cmd = vec!["echo".to_string(), "secret-token".to_string()];
        let provider = CommandCredential::new(&cmd, Duration::from_secs(900)).unwrap();
        let cred = provider.credential().await.unwrap();
        assert_eq!(cred.secret, "secret-token");
        assert!(cred.expires_at.is_some());
    }

    #[test]
    fn test_command_credential_requires_program() {
        assert!(matches!(
            CommandCredential::new(&[], Duration::from_secs(1)),
            Err(CredentialError::Missing)
        ));
    }

    #[tokio::test]
    async fn test_for_store_prefers_token_command() {
        let config = StoreConfig {
            password: Some("fixed".to_string()),
            token_command: Some(vec!["echo".to_string(), "{user}-token".to_string()]),
            ..StoreConfig::default()
        };
        let cred = for_store(&config).unwrap().credential().await.unwrap();
        assert_eq!(cred.secret, "admin-token");

        let config = StoreConfig {
            password: Some("fixed".to_string()),
            ..StoreConfig::default()
        };
        let cred = for_store(&config).unwrap().credential().await.unwrap();
        assert_eq!(cred.secret, "fixed");
        assert_eq!(cred.expires_at, None);
    }
}
