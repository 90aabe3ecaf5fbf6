//! Minimal OCI registry pull into a content store: manifest negotiation,
//! anonymous bearer-token retry, platform selection for indexes, blob fetch.

use std::collections::BTreeMap;

use reqwest::{header, Client as ReqwestClient, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::digest::OciDigest;
use crate::image_reference::ImageReference;
use crate::models::{self, Descriptor};
use crate::runtime::ContentStore;
use crate::{Error, Result};

/// Content-store reference label for blobs written during a pull.
const PULL_REF: &str = "delta-pull";

const GC_REF_PREFIX: &str = "containerd.io/gc.ref.content";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

// Token authentication response from the auth service
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ManifestBody {
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct IndexBody {
    manifests: Vec<Descriptor>,
}

/// A client for pulling images from an OCI registry.
pub struct RegistryClient {
    client: ReqwestClient,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        Self {
            client: ReqwestClient::new(),
        }
    }

    /// Pull an image into the content store and return the descriptor the
    /// image record should point at (the index descriptor for
    /// multi-platform images).
    pub async fn pull(&self, content: &dyn ContentStore, reference: &str) -> Result<Descriptor> {
        let image_ref: ImageReference = reference.parse()?;
        let endpoint = image_ref.registry_endpoint();
        let repository = image_ref.repository();

        let url = format!("{}/v2/{}/manifests/{}", endpoint, repository, image_ref.tag);
        let response = self.get(&url, Some(MANIFEST_ACCEPT)).await?;
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(models::MEDIA_TYPE_OCI_MANIFEST)
            .to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| Error::PullFailed(format!("{}: {}", reference, e)))?;

        let target = Descriptor {
            media_type: media_type.clone(),
            digest: OciDigest::from_bytes(&data),
            size: data.len() as i64,
            platform: None,
            annotations: None,
        };
        content
            .write_blob(PULL_REF, &data, &target, BTreeMap::new())
            .await?;

        let manifest_desc = if models::is_manifest_list(&media_type) {
            let index: IndexBody = serde_json::from_slice(&data)
                .map_err(|e| Error::Malformed(e.to_string()))?;
            let child = index
                .manifests
                .iter()
                .find(|child| {
                    child.platform.as_ref().is_some_and(|p| {
                        p.os == std::env::consts::OS
                            && p.architecture.eq_ignore_ascii_case(std::env::consts::ARCH)
                    })
                })
                .ok_or_else(|| Error::NotFoundForPlatform {
                    os: std::env::consts::OS.to_string(),
                    arch: std::env::consts::ARCH.to_string(),
                })?;

            let url = format!("{}/v2/{}/manifests/{}", endpoint, repository, child.digest);
            let response = self.get(&url, Some(MANIFEST_ACCEPT)).await?;
            let data = response
                .bytes()
                .await
                .map_err(|e| Error::PullFailed(format!("{}: {}", reference, e)))?;
            content
                .write_blob(PULL_REF, &data, child, BTreeMap::new())
                .await?;
            child.clone()
        } else {
            target.clone()
        };

        // Fetch the config and every layer the resolved manifest references
        let manifest_data = content.read_blob(&manifest_desc.digest).await?;
        let manifest: ManifestBody = serde_json::from_slice(&manifest_data)
            .map_err(|e| Error::Malformed(e.to_string()))?;

        for desc in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            if content.info(&desc.digest).await.is_ok() {
                debug!(digest = %desc.digest, "blob already present, skipping fetch");
                continue;
            }
            let url = format!("{}/v2/{}/blobs/{}", endpoint, repository, desc.digest);
            let response = self.get(&url, None).await?;
            let data = response
                .bytes()
                .await
                .map_err(|e| Error::PullFailed(format!("{}: {}", reference, e)))?;
            content
                .write_blob(PULL_REF, &data, desc, BTreeMap::new())
                .await?;
        }

        // Anchor the fetched blobs to the manifest for the garbage collector
        let mut labels = BTreeMap::new();
        labels.insert(
            format!("{}.0", GC_REF_PREFIX),
            manifest.config.digest.to_string(),
        );
        for (i, layer) in manifest.layers.iter().enumerate() {
            labels.insert(
                format!("{}.{}", GC_REF_PREFIX, i + 1),
                layer.digest.to_string(),
            );
        }
        content
            .write_blob(PULL_REF, &manifest_data, &manifest_desc, labels)
            .await?;

        Ok(target)
    }

    async fn get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::PullFailed(format!("{}: {}", url, e)))?;

        // An anonymous pull gets a 401 with a Bearer challenge first; fetch
        // a token from the advertised realm and retry once.
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match challenge.as_deref().and_then(bearer_token_url) {
                Some(token_url) => {
                    let token: TokenResponse = self
                        .client
                        .get(token_url)
                        .send()
                        .await
                        .map_err(|e| Error::PullFailed(format!("token request: {}", e)))?
                        .json()
                        .await
                        .map_err(|e| Error::PullFailed(format!("token response: {}", e)))?;

                    let mut retry = self
                        .client
                        .get(url)
                        .header(header::AUTHORIZATION, format!("Bearer {}", token.token));
                    if let Some(accept) = accept {
                        retry = retry.header(header::ACCEPT, accept);
                    }
                    retry
                        .send()
                        .await
                        .map_err(|e| Error::PullFailed(format!("{}: {}", url, e)))?
                }
                None => response,
            }
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(Error::PullFailed(format!(
                "{}: registry returned {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }
}

/// Token endpoint from a `WWW-Authenticate: Bearer` challenge.
fn bearer_token_url(challenge: &str) -> Option<reqwest::Url> {
    let rest = challenge.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim_matches('"');
            match key {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let mut url = reqwest::Url::parse(&realm?).ok()?;
    if let Some(service) = service {
        url.query_pairs_mut().append_pair("service", &service);
    }
    if let Some(scope) = scope {
        url.query_pairs_mut().append_pair("scope", &scope);
    }
    Some(url)
}
