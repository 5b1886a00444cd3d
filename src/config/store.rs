//! 配置持久化
//!
//! The configuration document lives in one JSON file. Saves are atomic
//! (temp file + rename); a file that no longer parses is moved aside with a
//! timestamped name and a fresh configuration takes its place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::domain::{Configuration, LoadMode};
use crate::error::{DeployError, DeployResult};

/// 当前文件格式版本
const FORMAT_VERSION: u32 = 1;

/// On-disk envelope around [`Configuration`]
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredConfiguration {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    configuration: Configuration,
}

/// 配置存储
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置；文件不存在时返回空配置
    pub async fn load(&self) -> DeployResult<Configuration> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No configuration file, starting empty");
                return Ok(Configuration::default());
            }
            Err(e) => return Err(DeployError::io(&self.path, e)),
        };

        match serde_json::from_str::<StoredConfiguration>(&content) {
            Ok(stored) => {
                info!(
                    path = %self.path.display(),
                    version = stored.version,
                    items = stored.configuration.items.len(),
                    variables = stored.configuration.path_variables.len(),
                    "Loaded configuration"
                );
                Ok(stored.configuration)
            }
            Err(e) => {
                let backup = self.backup_path();
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Configuration file is corrupt, moving it aside"
                );
                fs::rename(&self.path, &backup)
                    .await
                    .map_err(|e| DeployError::io(&backup, e))?;
                Ok(Configuration::default())
            }
        }
    }

    /// 保存配置（原子写入）
    pub async fn save(&self, configuration: &Configuration) -> DeployResult<()> {
        let temp_path = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DeployError::io(parent, e))?;
            }
        }

        let stored = StoredConfiguration {
            version: FORMAT_VERSION,
            saved_at: Some(Utc::now()),
            configuration: configuration.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;

        fs::write(&temp_path, &content)
            .await
            .map_err(|e| DeployError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DeployError::io(&self.path, e))?;

        info!(
            path = %self.path.display(),
            items = configuration.items.len(),
            "Saved configuration"
        );
        Ok(())
    }

    /// Merge another configuration file into `configuration`.
    ///
    /// Unlike [`load`](Self::load), a file that does not parse is an error:
    /// nothing is imported and the file is left alone.
    pub async fn import(
        &self,
        configuration: &mut Configuration,
        source: &Path,
        mode: LoadMode,
    ) -> DeployResult<()> {
        let content = fs::read_to_string(source)
            .await
            .map_err(|e| DeployError::io(source, e))?;
        let stored: StoredConfiguration = serde_json::from_str(&content)
            .map_err(|e| DeployError::Config(format!("{}: {}", source.display(), e)))?;

        info!(
            source = %source.display(),
            mode = ?mode,
            items = stored.configuration.items.len(),
            "Importing configuration"
        );
        configuration.import(stored.configuration, mode);
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "configuration".to_string());
        self.path.with_file_name(format!("{name}.{stamp}.bak"))
    }
}
