//! 设置目录
//!
//! Named, typed descriptions of every policy knob, grouped the way a front end
//! presents them. Show/hide relationships between settings live in one
//! declarative table that is evaluated on demand against a policy.

use serde::Serialize;

use super::policy::{DeploymentPolicy, LockedFileAction};

/// Stable setting identifiers
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    Enabled,
    IncludeDirectories,
    LeftButNotRight,
    NewerOnLeft,
    NewerOnRight,
    Exclusions,
    Inclusions,
    LockedFileAction,
    StopMethod,
    RestartStoppedProcesses,
    ViewMode,
    NextConfiguration,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Boolean,
    List,
    ExtendedString,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingsGroup {
    General,
    Copy,
    LockedFiles,
    View,
    Chaining,
}

impl SettingsGroup {
    pub const ALL: [SettingsGroup; 5] = [
        SettingsGroup::General,
        SettingsGroup::Copy,
        SettingsGroup::LockedFiles,
        SettingsGroup::View,
        SettingsGroup::Chaining,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            SettingsGroup::General => "General Settings",
            SettingsGroup::Copy => "Copy Settings",
            SettingsGroup::LockedFiles => "Locked File Settings",
            SettingsGroup::View => "View Settings",
            SettingsGroup::Chaining => "Chaining Settings",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct SettingDescriptor {
    pub key: SettingKey,
    pub group: SettingsGroup,
    pub description: &'static str,
    pub extended_description: Option<&'static str>,
    pub kind: SettingKind,
    /// Takes effect only after the user opts in
    pub optional: bool,
}

const fn setting(
    key: SettingKey,
    group: SettingsGroup,
    description: &'static str,
    kind: SettingKind,
) -> SettingDescriptor {
    SettingDescriptor {
        key,
        group,
        description,
        extended_description: None,
        kind,
        optional: false,
    }
}

pub static SETTINGS: &[SettingDescriptor] = &[
    setting(SettingKey::Enabled, SettingsGroup::General, "Enabled:", SettingKind::Boolean),
    setting(
        SettingKey::IncludeDirectories,
        SettingsGroup::General,
        "Include directories:",
        SettingKind::Boolean,
    ),
    setting(
        SettingKey::LeftButNotRight,
        SettingsGroup::Copy,
        "If file exists on left but not on right:",
        SettingKind::List,
    ),
    setting(SettingKey::NewerOnLeft, SettingsGroup::Copy, "If file is newer on left:", SettingKind::List),
    setting(SettingKey::NewerOnRight, SettingsGroup::Copy, "If file is newer on right:", SettingKind::List),
    SettingDescriptor {
        extended_description: Some("One exclusion per line. Use * as wildcard.\n\nFor example:\n*.exe\n*.config"),
        ..setting(SettingKey::Exclusions, SettingsGroup::Copy, "Exclusions list:", SettingKind::ExtendedString)
    },
    SettingDescriptor {
        extended_description: Some(
            "One inclusion per line. Use * as wildcard.\nWhen set, only matching files are deployed.",
        ),
        ..setting(SettingKey::Inclusions, SettingsGroup::Copy, "Inclusions list:", SettingKind::ExtendedString)
    },
    setting(
        SettingKey::LockedFileAction,
        SettingsGroup::LockedFiles,
        "If destination file is locked:",
        SettingKind::List,
    ),
    setting(
        SettingKey::StopMethod,
        SettingsGroup::LockedFiles,
        "Stop services by:",
        SettingKind::List,
    ),
    setting(
        SettingKey::RestartStoppedProcesses,
        SettingsGroup::LockedFiles,
        "Restart stopped processes when finished:",
        SettingKind::Boolean,
    ),
    setting(SettingKey::ViewMode, SettingsGroup::View, "File view options:", SettingKind::List),
    SettingDescriptor {
        optional: true,
        ..setting(
            SettingKey::NextConfiguration,
            SettingsGroup::Chaining,
            "Then deploy configuration:",
            SettingKind::List,
        )
    },
];

/// A show/hide dependency: `dependents` are visible only while `condition` holds
pub struct VisibilityRule {
    pub parent: SettingKey,
    pub dependents: &'static [SettingKey],
    pub condition: fn(&DeploymentPolicy) -> bool,
}

pub static VISIBILITY_RULES: &[VisibilityRule] = &[
    VisibilityRule {
        parent: SettingKey::LockedFileAction,
        dependents: &[SettingKey::StopMethod, SettingKey::RestartStoppedProcesses],
        condition: |p| p.locked_file_action == LockedFileAction::StopLockingProcesses,
    },
    VisibilityRule {
        parent: SettingKey::NextConfiguration,
        dependents: &[SettingKey::NextConfiguration],
        condition: |p| p.next_configuration.selected,
    },
];

pub fn descriptor(key: SettingKey) -> Option<&'static SettingDescriptor> {
    SETTINGS.iter().find(|s| s.key == key)
}

/// Possible values of a list setting, as their serialized names
pub fn possible_values(key: SettingKey) -> &'static [&'static str] {
    match key {
        SettingKey::LeftButNotRight => &["skip", "copy"],
        SettingKey::NewerOnLeft | SettingKey::NewerOnRight => &["skip", "replace"],
        SettingKey::LockedFileAction => &["stop_locking_processes", "wait_for_locking_processes", "skip"],
        SettingKey::StopMethod => &["shutdown_gracefully", "kill"],
        SettingKey::ViewMode => &["all", "pending", "excluded"],
        _ => &[],
    }
}

/// Whether a setting's value is shown for `policy`.
///
/// Optional settings stay listed so the user can opt in; the rule for
/// `NextConfiguration` only governs its value editor.
pub fn is_visible(key: SettingKey, policy: &DeploymentPolicy) -> bool {
    VISIBILITY_RULES
        .iter()
        .filter(|rule| rule.dependents.contains(&key) && rule.parent != key)
        .all(|rule| (rule.condition)(policy))
}

/// Whether the value editor of an optional setting is active
pub fn is_value_shown(key: SettingKey, policy: &DeploymentPolicy) -> bool {
    is_visible(key, policy)
        && VISIBILITY_RULES
            .iter()
            .filter(|rule| rule.parent == key && rule.dependents.contains(&key))
            .all(|rule| (rule.condition)(policy))
}

/// The visible settings of one group, in catalog order
pub fn visible_settings(group: SettingsGroup, policy: &DeploymentPolicy) -> Vec<&'static SettingDescriptor> {
    SETTINGS
        .iter()
        .filter(|s| s.group == group && is_visible(s.key, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_has_descriptor() {
        let keys = [
            SettingKey::Enabled,
            SettingKey::IncludeDirectories,
            SettingKey::LeftButNotRight,
            SettingKey::NewerOnLeft,
            SettingKey::NewerOnRight,
            SettingKey::Exclusions,
            SettingKey::Inclusions,
            SettingKey::LockedFileAction,
            SettingKey::StopMethod,
            SettingKey::RestartStoppedProcesses,
            SettingKey::ViewMode,
            SettingKey::NextConfiguration,
        ];
        for key in keys {
            assert!(descriptor(key).is_some(), "missing descriptor for {:?}", key);
        }
    }

    #[test]
    fn test_list_settings_have_values() {
        for s in SETTINGS.iter().filter(|s| s.kind == SettingKind::List) {
            if s.key != SettingKey::NextConfiguration {
                assert!(!possible_values(s.key).is_empty(), "{:?}", s.key);
            }
        }
    }

    #[test]
    fn test_stop_settings_follow_locked_file_action() {
        let mut policy = DeploymentPolicy::default();
        let keys: Vec<_> = visible_settings(SettingsGroup::LockedFiles, &policy)
            .iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                SettingKey::LockedFileAction,
                SettingKey::StopMethod,
                SettingKey::RestartStoppedProcesses
            ]
        );

        policy.locked_file_action = LockedFileAction::Skip;
        let keys: Vec<_> = visible_settings(SettingsGroup::LockedFiles, &policy)
            .iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec![SettingKey::LockedFileAction]);
    }

    #[test]
    fn test_optional_setting_value_follows_selection() {
        let mut policy = DeploymentPolicy::default();
        assert!(is_visible(SettingKey::NextConfiguration, &policy));
        assert!(!is_value_shown(SettingKey::NextConfiguration, &policy));

        policy.next_configuration.selected = true;
        assert!(is_value_shown(SettingKey::NextConfiguration, &policy));
        assert!(descriptor(SettingKey::NextConfiguration).unwrap().optional);
    }
}
