//! 路径变量
//!
//! Named placeholders (e.g. `%ENV%`) substituted into raw directory paths.

use serde::{Deserialize, Serialize};

/// One candidate value of a path variable
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PossibleValue {
    pub value: String,
    #[serde(default)]
    pub selected: bool,
}

/// A named placeholder with a list of candidate values, at most one selected
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathVariable {
    pub name: String,
    #[serde(default)]
    pub values: Vec<PossibleValue>,
}

impl PathVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Builder form of [`add_value`](Self::add_value)
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.add_value(value);
        self
    }

    /// Append a candidate; the first candidate ever added becomes selected
    pub fn add_value(&mut self, value: impl Into<String>) {
        let selected = !self.values.iter().any(|v| v.selected);
        self.values.push(PossibleValue {
            value: value.into(),
            selected,
        });
    }

    /// Select the candidate at `index`, deselecting every other one
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.values.len() {
            return false;
        }
        for (i, v) in self.values.iter_mut().enumerate() {
            v.selected = i == index;
        }
        true
    }

    /// Remove a candidate; if nothing stays selected, the first remaining one is
    pub fn remove_value(&mut self, index: usize) -> Option<PossibleValue> {
        if index >= self.values.len() {
            return None;
        }
        let removed = self.values.remove(index);
        if !self.values.iter().any(|v| v.selected) {
            if let Some(first) = self.values.first_mut() {
                first.selected = true;
            }
        }
        Some(removed)
    }

    /// The selected value, falling back to the first candidate
    pub fn selected_value(&self) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.selected)
            .or_else(|| self.values.first())
            .map(|v| v.value.as_str())
    }
}

/// Substitute every variable's selected value into `raw`, in list order.
///
/// Plain textual replacement: no escaping and no recursive expansion beyond
/// what list order naturally produces.
pub fn resolve_path(raw: &str, variables: &[PathVariable]) -> String {
    if raw.is_empty() {
        return String::new();
    }

    variables.iter().fold(raw.to_string(), |path, variable| {
        if variable.name.is_empty() || !path.contains(&variable.name) {
            return path;
        }
        match variable.selected_value() {
            Some(value) => path.replace(&variable.name, value),
            None => path,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_is_selected() {
        let var = PathVariable::new("%ENV%").with_value("dev").with_value("prod");
        assert!(var.values[0].selected);
        assert!(!var.values[1].selected);
        assert_eq!(var.selected_value(), Some("dev"));
    }

    #[test]
    fn test_select_is_exclusive() {
        let mut var = PathVariable::new("%ENV%").with_value("dev").with_value("prod");
        assert!(var.select(1));
        assert_eq!(var.values.iter().filter(|v| v.selected).count(), 1);
        assert_eq!(var.selected_value(), Some("prod"));
        assert!(!var.select(5));
    }

    #[test]
    fn test_removing_selected_reselects_first() {
        let mut var = PathVariable::new("%ENV%")
            .with_value("dev")
            .with_value("qa")
            .with_value("prod");
        var.select(2);
        var.remove_value(2);
        assert_eq!(var.selected_value(), Some("dev"));
        assert!(var.values[0].selected);
    }

    #[test]
    fn test_unselected_loaded_variable_uses_first_value() {
        let var: PathVariable =
            serde_json::from_str(r#"{"name":"%ROOT%","values":[{"value":"C:\\a"},{"value":"D:\\b"}]}"#)
                .unwrap();
        assert_eq!(var.selected_value(), Some("C:\\a"));
    }

    #[test]
    fn test_resolve_in_list_order() {
        let vars = vec![
            PathVariable::new("%ROOT%").with_value("/srv/%ENV%"),
            PathVariable::new("%ENV%").with_value("prod"),
        ];
        assert_eq!(resolve_path("%ROOT%/app", &vars), "/srv/prod/app");

        // Reverse order leaves the nested token unresolved
        let reversed: Vec<_> = vars.into_iter().rev().collect();
        assert_eq!(resolve_path("%ROOT%/app", &reversed), "/srv/%ENV%/app");
    }

    #[test]
    fn test_resolve_without_variables() {
        assert_eq!(resolve_path("/plain/path", &[]), "/plain/path");
        assert_eq!(resolve_path("", &[PathVariable::new("%X%").with_value("y")]), "");
    }
}
