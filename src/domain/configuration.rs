//! 配置模型
//!
//! The root document: every configuration item plus the shared path variables.
//! Passed explicitly into the diff and deploy calls; there is no global instance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::path_variable::{resolve_path, PathVariable};
use super::policy::DeploymentPolicy;

/// Default name prefix for new configuration items
pub const DEFAULT_ITEM_NAME: &str = "New Configuration";

/// One source/destination directory pair, with its raw and resolved paths
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryPairing {
    pub raw_left: String,
    pub raw_right: String,
    pub left: PathBuf,
    pub right: PathBuf,
}

impl DirectoryPairing {
    /// Short label "left ⇄ right" from the last path components
    pub fn short_name(&self) -> String {
        let leaf = |p: &PathBuf| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        format!("{} \u{21c4} {}", leaf(&self.left), leaf(&self.right))
    }
}

/// A named deployment: source directories, destination directories and policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationItem {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub source_directories: Vec<String>,
    #[serde(default)]
    pub destination_directories: Vec<String>,
    #[serde(default)]
    pub policy: DeploymentPolicy,
}

impl ConfigurationItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_directories: Vec::new(),
            destination_directories: Vec::new(),
            policy: DeploymentPolicy::default(),
        }
    }

    /// Every source × destination combination, resolved against `variables`.
    /// A disabled item has no pairings.
    pub fn pairings(&self, variables: &[PathVariable]) -> Vec<DirectoryPairing> {
        if !self.policy.enabled {
            return Vec::new();
        }

        let mut pairings = Vec::new();
        for source in &self.source_directories {
            for destination in &self.destination_directories {
                pairings.push(DirectoryPairing {
                    raw_left: source.clone(),
                    raw_right: destination.clone(),
                    left: PathBuf::from(resolve_path(source, variables)),
                    right: PathBuf::from(resolve_path(destination, variables)),
                });
            }
        }
        pairings
    }
}

/// How an imported document is merged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMode {
    Append,
    Replace,
}

/// Root configuration document
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    #[serde(default)]
    pub items: Vec<ConfigurationItem>,
    #[serde(default)]
    pub path_variables: Vec<PathVariable>,
    #[serde(default)]
    pub selected_index: usize,
}

impl Configuration {
    pub fn item(&self, id: Uuid) -> Option<&ConfigurationItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: Uuid) -> Option<&mut ConfigurationItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Case-insensitive lookup by name
    pub fn item_by_name(&self, name: &str) -> Option<&ConfigurationItem> {
        let wanted = name.to_lowercase();
        self.items.iter().find(|i| i.name.to_lowercase() == wanted)
    }

    pub fn selected_item(&self) -> Option<&ConfigurationItem> {
        self.items.get(self.selected_index)
    }

    /// Resolved pairings of one item
    pub fn pairings(&self, id: Uuid) -> Vec<DirectoryPairing> {
        self.item(id)
            .map(|item| item.pairings(&self.path_variables))
            .unwrap_or_default()
    }

    /// "New Configuration N" where N is one past the highest existing default-named item
    pub fn generate_item_name(&self) -> String {
        let prefix = format!("{DEFAULT_ITEM_NAME} ");
        let highest = self
            .items
            .iter()
            .filter_map(|i| i.name.strip_prefix(&prefix))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("{DEFAULT_ITEM_NAME} {}", highest.saturating_add(1))
    }

    pub fn duplicate_item_name(existing: &str) -> String {
        format!("{existing} - Copy")
    }

    /// Append a new default item and select it
    pub fn add_item(&mut self) -> Uuid {
        let item = ConfigurationItem::new(self.generate_item_name());
        let id = item.id;
        self.items.push(item);
        self.selected_index = self.items.len() - 1;
        id
    }

    /// Copy an item under a new id and "<name> - Copy" name, inserted after it
    pub fn duplicate_item(&mut self, id: Uuid) -> Option<Uuid> {
        let index = self.items.iter().position(|i| i.id == id)?;
        let mut copy = self.items[index].clone();
        copy.id = Uuid::new_v4();
        copy.name = Self::duplicate_item_name(&copy.name);
        let new_id = copy.id;
        self.items.insert(index + 1, copy);
        Some(new_id)
    }

    /// Remove an item and clear every chain reference pointing at it
    pub fn remove_item(&mut self, id: Uuid) -> Option<ConfigurationItem> {
        let index = self.items.iter().position(|i| i.id == id)?;
        let removed = self.items.remove(index);

        for item in &mut self.items {
            if item.policy.next_configuration.value == Some(id) {
                item.policy.next_configuration = Default::default();
            }
        }

        if self.selected_index >= self.items.len() {
            self.selected_index = self.items.len().saturating_sub(1);
        }
        Some(removed)
    }

    /// Merge an imported document
    pub fn import(&mut self, imported: Configuration, mode: LoadMode) {
        match mode {
            LoadMode::Replace => {
                self.items = imported.items;
                self.path_variables = imported.path_variables;
                self.selected_index = imported.selected_index;
            }
            LoadMode::Append => {
                self.items.extend(imported.items);
                self.path_variables.extend(imported.path_variables);
            }
        }
    }

    pub fn append(&mut self, other: Configuration) {
        self.import(other, LoadMode::Append);
    }

    pub fn replace(&mut self, other: Configuration) {
        self.import(other, LoadMode::Replace);
    }
}
