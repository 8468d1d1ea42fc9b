use anyhow::Result;
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::aws_profile::{ProfileCredentialProvider, profile_region};
use crate::config::StoreConfig;

/// Create the object store holding the log bucket
pub async fn create_object_store(store_config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let Some(profile) = store_config.profile.as_deref() else {
        return create_object_store_from_dsn(&store_config.dsn, &store_config.region);
    };

    let url = parse_dsn(&store_config.dsn)?;
    if url.scheme() != "s3" {
        tracing::warn!(
            profile,
            scheme = url.scheme(),
            "AWS profile only applies to s3 stores, ignoring it"
        );
        return create_object_store_from_dsn(&store_config.dsn, &store_config.region);
    }

    let builder = create_s3_builder_with_profile(&url, &store_config.region, profile).await?;
    Ok(Arc::new(builder.build()?))
}

fn parse_dsn(dsn: &str) -> Result<Url> {
    Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str, region: &str) -> Result<Arc<dyn ObjectStore>> {
    let url = parse_dsn(dsn)?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/bucket"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url, region)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url, region: &str) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }
    if bucket.contains('/') {
        return Err(anyhow::anyhow!(
            "S3 DSN bucket must not contain a prefix: {}",
            bucket
        ));
    }

    // Standard AWS_* environment first, DSN values override it
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if std::env::var_os("AWS_DEFAULT_REGION").is_none() && std::env::var_os("AWS_REGION").is_none()
    {
        builder = builder.with_region(region);
    }

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no custom endpoint; anything else is S3-compatible (MinIO etc)
    if !host.ends_with("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false); // MinIO requires path-style URLs
    }

    Ok(builder)
}

/// Create an S3 builder whose credentials and region come from a shared AWS
/// config profile. Credentials in the DSN and a region in the AWS
/// environment still take precedence.
pub async fn create_s3_builder_with_profile(
    dsn: &Url,
    region: &str,
    profile: &str,
) -> Result<AmazonS3Builder> {
    let region = profile_region(profile)
        .await
        .unwrap_or_else(|| region.to_string());
    let builder = create_s3_builder_from_dsn(dsn, &region)?;

    if !dsn.username().is_empty() {
        return Ok(builder);
    }

    tracing::info!(profile, "Using AWS shared config profile for credentials");
    Ok(builder.with_credentials(Arc::new(ProfileCredentialProvider::new(profile))))
}
