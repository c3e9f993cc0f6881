use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    /// `FACTORLAB_HOME` wins over `~/.factorlab`.
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("FACTORLAB_HOME") {
            if !home.trim().is_empty() {
                return Self { base: PathBuf::from(home) };
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".factorlab"))
            .unwrap_or_else(|| PathBuf::from(".factorlab"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn workspace(&self) -> PathBuf {
        self.base.join("workspace")
    }

    pub fn explore_db(&self) -> PathBuf {
        self.workspace().join("explore.db")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.workspace())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_base() {
        let paths = Paths::with_base(PathBuf::from("/tmp/fl"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/fl/config.json"));
        assert_eq!(paths.explore_db(), PathBuf::from("/tmp/fl/workspace/explore.db"));
    }
}
