use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::{config::Software, error::ResolutionError};

pub mod fabric;
pub mod forge;
pub mod java;
pub mod paper;
pub mod vanilla;

pub use java::{JavaInstall, JavaRuntimes, recommended_java};

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._+-]*$").expect("static regex"));

/// Operator-supplied versions end up in request paths, so only plain
/// version tokens are let through.
pub fn version_token(value: &str) -> Result<&str, ResolutionError> {
    if VERSION_TOKEN.is_match(value) {
        Ok(value)
    } else {
        Err(ResolutionError::UnknownVersion(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub software: Software,
    pub mc_version: String,
    pub software_version: String,
}

#[async_trait]
pub trait SoftwareCatalog: Send + Sync {
    async fn mc_versions(&self, software: Software) -> Result<Vec<String>, ResolutionError>;

    async fn builds(
        &self,
        software: Software,
        mc_version: &str,
    ) -> Result<Vec<String>, ResolutionError>;

    async fn download_url(&self, request: &InstallRequest) -> Result<String, ResolutionError>;
}

#[derive(Debug, Clone)]
pub struct CatalogEndpoints {
    pub vanilla_manifest: String,
    pub paper_api: String,
    pub fabric_meta: String,
    pub forge_index: String,
    pub forge_maven: String,
}

impl Default for CatalogEndpoints {
    fn default() -> Self {
        Self {
            vanilla_manifest: "https://launchermeta.mojang.com/mc/game/version_manifest.json"
                .to_string(),
            paper_api: "https://api.papermc.io/v2/projects/paper".to_string(),
            fabric_meta: "https://meta.fabricmc.net/v2/versions".to_string(),
            forge_index: "https://meta.multimc.org/v1/net.minecraftforge".to_string(),
            forge_maven: "https://maven.minecraftforge.net/net/minecraftforge/forge".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpCatalog {
    http: reqwest::Client,
    endpoints: CatalogEndpoints,
}

impl HttpCatalog {
    pub fn new(endpoints: CatalogEndpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolutionError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ResolutionError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolutionError::UnknownVersion(url.to_string()));
        }

        resp.error_for_status()
            .map_err(|e| ResolutionError::Network(e.to_string()))?
            .json::<T>()
            .await
            .map_err(|e| ResolutionError::Network(e.to_string()))
    }
}

impl Default for HttpCatalog {
    fn default() -> Self {
        Self::new(CatalogEndpoints::default())
    }
}

#[async_trait]
impl SoftwareCatalog for HttpCatalog {
    async fn mc_versions(&self, software: Software) -> Result<Vec<String>, ResolutionError> {
        let ep = &self.endpoints;
        Ok(match software {
            Software::Vanilla => self
                .fetch::<vanilla::VersionManifest>(&ep.vanilla_manifest)
                .await?
                .releases(),
            Software::Paper => self
                .fetch::<paper::ProjectInfo>(&ep.paper_api)
                .await?
                .mc_versions(),
            Software::Fabric => self
                .fetch::<fabric::VersionIndex>(&ep.fabric_meta)
                .await?
                .stable_game_versions(),
            Software::Forge => self
                .fetch::<forge::ForgeIndex>(&ep.forge_index)
                .await?
                .mc_versions(),
        })
    }

    async fn builds(
        &self,
        software: Software,
        mc_version: &str,
    ) -> Result<Vec<String>, ResolutionError> {
        let ep = &self.endpoints;
        let mc_version = version_token(mc_version)?;
        match software {
            Software::Vanilla => Err(ResolutionError::UnsupportedSoftware(
                software.to_string(),
            )),
            Software::Paper => Ok(self
                .fetch::<paper::VersionInfo>(&paper::version_url(&ep.paper_api, mc_version))
                .await?
                .builds()),
            Software::Fabric => Ok(self
                .fetch::<fabric::VersionIndex>(&ep.fabric_meta)
                .await?
                .loader_versions()),
            Software::Forge => Ok(self
                .fetch::<forge::ForgeIndex>(&ep.forge_index)
                .await?
                .forge_versions(mc_version)),
        }
    }

    async fn download_url(&self, request: &InstallRequest) -> Result<String, ResolutionError> {
        let ep = &self.endpoints;
        let mc = version_token(&request.mc_version)?;
        let build = if request.software.has_builds() {
            version_token(&request.software_version)?
        } else {
            ""
        };

        match request.software {
            Software::Vanilla => {
                let manifest = self
                    .fetch::<vanilla::VersionManifest>(&ep.vanilla_manifest)
                    .await?;
                let package_url = manifest
                    .package_url(mc)
                    .ok_or_else(|| ResolutionError::UnknownVersion(mc.to_string()))?;
                self.fetch::<vanilla::ReleasePackage>(package_url)
                    .await?
                    .server_url()
                    .ok_or_else(|| ResolutionError::UnknownVersion(mc.to_string()))
            }
            Software::Paper => {
                let info = self
                    .fetch::<paper::VersionInfo>(&paper::version_url(&ep.paper_api, mc))
                    .await?;
                if !info.has_build(build) {
                    return Err(ResolutionError::UnknownVersion(format!("{mc}-{build}")));
                }
                Ok(paper::download_url(&ep.paper_api, mc, build))
            }
            Software::Fabric => self
                .fetch::<fabric::VersionIndex>(&ep.fabric_meta)
                .await?
                .download_url(&ep.fabric_meta, mc, build),
            Software::Forge => {
                let index = self.fetch::<forge::ForgeIndex>(&ep.forge_index).await?;
                if !index.forge_versions(mc).iter().any(|v| v == build) {
                    return Err(ResolutionError::UnknownVersion(format!("{mc}-{build}")));
                }
                Ok(forge::installer_url(&ep.forge_maven, mc, build))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_tokens() {
        for ok in ["1.20.4", "24w14a", "1.20.4-49.0.3", "0.15.6+build.1", "496"] {
            assert_eq!(version_token(ok).unwrap(), ok);
        }
        for bad in ["", "../paper", "1.20.4/../../x", "1.20?x=1", "1.20#f", ".hidden"] {
            assert!(matches!(
                version_token(bad),
                Err(ResolutionError::UnknownVersion(v)) if v == bad
            ));
        }
    }

    #[tokio::test]
    async fn path_tricks_are_refused_before_any_request() {
        // Nothing listens here; a request would surface as a network error.
        let dead = "http://127.0.0.1:9".to_string();
        let catalog = HttpCatalog::new(CatalogEndpoints {
            vanilla_manifest: dead.clone(),
            paper_api: dead.clone(),
            fabric_meta: dead.clone(),
            forge_index: dead.clone(),
            forge_maven: dead,
        });

        assert!(matches!(
            catalog.builds(Software::Paper, "../../users").await,
            Err(ResolutionError::UnknownVersion(_))
        ));
        assert!(matches!(
            catalog
                .download_url(&InstallRequest {
                    software: Software::Paper,
                    mc_version: "1.20.4".into(),
                    software_version: "496?redirect=evil".into(),
                })
                .await,
            Err(ResolutionError::UnknownVersion(_))
        ));
    }
}
