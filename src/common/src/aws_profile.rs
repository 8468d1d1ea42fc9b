//! Credentials and region from a named profile of the shared AWS config
//! files (`~/.aws/config`, `~/.aws/credentials`, or the files named by
//! `AWS_CONFIG_FILE` / `AWS_SHARED_CREDENTIALS_FILE`).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::meta::region::ProvideRegion;
use aws_config::profile::{ProfileFileCredentialsProvider, ProfileFileRegionProvider};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use object_store::CredentialProvider;
use object_store::aws::AwsCredential;
use tokio::sync::Mutex;

/// Credentials are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Region configured for `profile`, if any.
pub async fn profile_region(profile: &str) -> Option<String> {
    let provider = ProfileFileRegionProvider::builder()
        .profile_name(profile)
        .build();
    ProvideRegion::region(&provider)
        .await
        .map(|region| region.as_ref().to_string())
}

/// [`CredentialProvider`] for object_store's S3 client backed by a shared
/// config profile. Credentials are cached until shortly before they expire.
#[derive(Debug)]
pub struct ProfileCredentialProvider {
    profile: String,
    inner: ProfileFileCredentialsProvider,
    cached: Mutex<Option<Cached>>,
}

#[derive(Debug)]
struct Cached {
    credential: Arc<AwsCredential>,
    expiry: Option<SystemTime>,
}

impl ProfileCredentialProvider {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            inner: ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build(),
            cached: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

fn to_aws_credential(credentials: &Credentials) -> AwsCredential {
    AwsCredential {
        key_id: credentials.access_key_id().to_string(),
        secret_key: credentials.secret_access_key().to_string(),
        token: credentials.session_token().map(str::to_string),
    }
}

fn needs_refresh(expiry: Option<SystemTime>, now: SystemTime) -> bool {
    match expiry {
        Some(expiry) => now + REFRESH_MARGIN >= expiry,
        None => false,
    }
}

#[async_trait]
impl CredentialProvider for ProfileCredentialProvider {
    type Credential = AwsCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AwsCredential>> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if !needs_refresh(entry.expiry, SystemTime::now()) {
                return Ok(entry.credential.clone());
            }
        }

        let credentials = ProvideCredentials::provide_credentials(&self.inner)
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "S3",
                source: format!("failed to load credentials of profile {:?}: {e}", self.profile)
                    .into(),
            })?;
        tracing::debug!(profile = %self.profile, "Loaded credentials from shared config profile");

        let credential = Arc::new(to_aws_credential(&credentials));
        *cached = Some(Cached {
            credential: credential.clone(),
            expiry: credentials.expiry(),
        });
        Ok(credential)
    }
}
