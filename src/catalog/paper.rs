use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub builds: Vec<u32>,
}

impl ProjectInfo {
    pub fn mc_versions(&self) -> Vec<String> {
        self.versions.iter().rev().cloned().collect()
    }
}

impl VersionInfo {
    pub fn builds(&self) -> Vec<String> {
        self.builds.iter().rev().map(u32::to_string).collect()
    }

    pub fn has_build(&self, build: &str) -> bool {
        build
            .parse::<u32>()
            .map(|b| self.builds.contains(&b))
            .unwrap_or(false)
    }
}

pub fn version_url(api: &str, mc_version: &str) -> String {
    format!("{api}/versions/{mc_version}")
}

pub fn download_url(api: &str, mc_version: &str, build: &str) -> String {
    format!("{api}/versions/{mc_version}/builds/{build}/downloads/paper-{mc_version}-{build}.jar")
}
