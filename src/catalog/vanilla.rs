use serde::Deserialize;

use crate::config::Version;

#[derive(Debug, Clone, Deserialize)]
pub struct VersionManifest {
    pub versions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl VersionManifest {
    pub fn releases(&self) -> Vec<String> {
        self.versions
            .iter()
            .filter(|v| v.kind == "release")
            .filter(|v| {
                v.id.parse::<Version>()
                    .map(|ver| ver.minor >= 3)
                    .unwrap_or(false)
            })
            .map(|v| v.id.clone())
            .collect()
    }

    pub fn package_url(&self, id: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.url.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleasePackage {
    pub downloads: Downloads,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Downloads {
    pub server: Option<Artifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub url: String,
}

impl ReleasePackage {
    pub fn server_url(&self) -> Option<String> {
        self.downloads.server.as_ref().map(|a| a.url.clone())
    }
}
