use std::collections::BTreeSet;

use serde::Deserialize;

use crate::config::Version;

#[derive(Debug, Clone, Deserialize)]
pub struct ForgeIndex {
    pub versions: Vec<ForgeVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgeVersion {
    pub version: String,
    #[serde(default)]
    pub requires: Vec<Requirement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Requirement {
    pub equals: Option<String>,
}

impl ForgeVersion {
    fn mc_version(&self) -> Option<&str> {
        self.requires.first().and_then(|r| r.equals.as_deref())
    }
}

impl ForgeIndex {
    pub fn mc_versions(&self) -> Vec<String> {
        let mut versions: Vec<(Version, String)> = self
            .versions
            .iter()
            .filter_map(ForgeVersion::mc_version)
            .filter(|v| !v.contains('-'))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|v| v.parse::<Version>().ok().map(|p| (p, v.to_string())))
            .collect();

        versions.sort_by(|a, b| b.0.cmp(&a.0));
        versions.into_iter().map(|(_, v)| v).collect()
    }

    pub fn forge_versions(&self, mc_version: &str) -> Vec<String> {
        self.versions
            .iter()
            .filter(|v| v.mc_version() == Some(mc_version))
            .map(|v| v.version.clone())
            .collect()
    }
}

pub fn installer_url(maven: &str, mc_version: &str, build: &str) -> String {
    format!("{maven}/{mc_version}-{build}/forge-{mc_version}-{build}-installer.jar")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "name": "Forge",
        "versions": [
            {"version": "49.0.19", "requires": [{"uid": "net.minecraft", "equals": "1.20.4"}]},
            {"version": "47.2.0", "requires": [{"uid": "net.minecraft", "equals": "1.20.1"}]},
            {"version": "47.1.0", "requires": [{"uid": "net.minecraft", "equals": "1.20.1"}]},
            {"version": "10.13.4.1614", "requires": [{"uid": "net.minecraft", "equals": "1.7.10"}]},
            {"version": "10.12.2.1147", "requires": [{"uid": "net.minecraft", "equals": "1.7.10-pre4"}]},
            {"version": "14.23.5.2860", "requires": [{"uid": "net.minecraft", "equals": "1.12.2"}]}
        ]
    }"#;

    #[test]
    fn mc_versions_sorted_numerically() {
        let index: ForgeIndex = serde_json::from_str(INDEX).unwrap();
        assert_eq!(
            index.mc_versions(),
            vec!["1.20.4", "1.20.1", "1.12.2", "1.7.10"]
        );
    }

    #[test]
    fn builds_for_version() {
        let index: ForgeIndex = serde_json::from_str(INDEX).unwrap();
        assert_eq!(index.forge_versions("1.20.1"), vec!["47.2.0", "47.1.0"]);
        assert!(index.forge_versions("1.8").is_empty());
    }

    #[test]
    fn maven_installer_url() {
        assert_eq!(
            installer_url("https://maven.minecraftforge.net/net/minecraftforge/forge", "1.20.1", "47.2.0"),
            "https://maven.minecraftforge.net/net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-installer.jar"
        );
    }
}
