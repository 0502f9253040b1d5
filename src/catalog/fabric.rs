use serde::Deserialize;

use crate::error::ResolutionError;

#[derive(Debug, Clone, Deserialize)]
pub struct VersionIndex {
    pub game: Vec<GameVersion>,
    pub loader: Vec<ComponentVersion>,
    pub installer: Vec<ComponentVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameVersion {
    pub version: String,
    pub stable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentVersion {
    pub version: String,
}

impl VersionIndex {
    pub fn stable_game_versions(&self) -> Vec<String> {
        self.game
            .iter()
            .filter(|g| g.stable)
            .map(|g| g.version.clone())
            .collect()
    }

    pub fn loader_versions(&self) -> Vec<String> {
        self.loader.iter().map(|l| l.version.clone()).collect()
    }

    pub fn download_url(
        &self,
        meta: &str,
        mc_version: &str,
        loader: &str,
    ) -> Result<String, ResolutionError> {
        if !self.game.iter().any(|g| g.version == mc_version) {
            return Err(ResolutionError::UnknownVersion(mc_version.to_string()));
        }
        if !self.loader.iter().any(|l| l.version == loader) {
            return Err(ResolutionError::UnknownVersion(loader.to_string()));
        }
        let installer = self
            .installer
            .first()
            .ok_or_else(|| ResolutionError::UnknownVersion("fabric installer".to_string()))?;

        Ok(format!(
            "{meta}/loader/{mc_version}/{loader}/{}/server/jar",
            installer.version
        ))
    }
}
