//! Configuration variables.
//!
//! Variables are named layouts. `${var:name}` looks them up at render
//! time; `${name}` in an attribute is expanded while parsing. Entries set
//! through the API after load are flagged so they can be carried across a
//! reload when `keepVariablesOnReload` is on.

use std::fmt;

use dashmap::DashMap;

use crate::layout::Layout;

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Layout,
    /// Set or changed at runtime rather than declared in the source.
    pub runtime: bool,
}

/// Case-insensitive, thread-safe variable map.
#[derive(Default)]
pub struct VariableMap {
    entries: DashMap<String, Variable>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable at runtime.
    pub fn set(&self, name: &str, value: Layout) {
        self.insert(name, value, true);
    }

    /// Set a variable at runtime to fixed text.
    pub fn set_text(&self, name: &str, text: &str) {
        self.set(name, Layout::literal(text));
    }

    /// Record a variable declared by the configuration source.
    pub(crate) fn declare(&self, name: &str, value: Layout) {
        self.insert(name, value, false);
    }

    pub(crate) fn insert(&self, name: &str, value: Layout, runtime: bool) {
        self.entries.insert(
            name.to_ascii_lowercase(),
            Variable {
                name: name.to_string(),
                value,
                runtime,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Layout> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&self, name: &str) -> Option<Layout> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, variable)| variable.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry, sorted by name.
    pub fn variables(&self) -> Vec<Variable> {
        let mut all: Vec<Variable> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        all
    }

    /// Entries that should survive a reload with `keepVariablesOnReload`.
    pub fn runtime_variables(&self) -> Vec<Variable> {
        self.variables().into_iter().filter(|v| v.runtime).collect()
    }
}

impl fmt::Debug for VariableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.variables().into_iter().map(|v| (v.name, v.value.text().to_string())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let vars = VariableMap::new();
        vars.set_text("Prefix", "[[");
        assert_eq!(vars.get("prefix").unwrap().text(), "[[");
        assert!(vars.contains("PREFIX"));
        assert_eq!(vars.variables()[0].name, "Prefix");
    }

    #[test]
    fn only_runtime_entries_are_kept() {
        let vars = VariableMap::new();
        vars.declare("declared", Layout::literal("a"));
        vars.set_text("runtime", "b");
        let kept: Vec<String> = vars.runtime_variables().into_iter().map(|v| v.name).collect();
        assert_eq!(kept, vec!["runtime"]);

        // redeclaring clears the runtime flag
        vars.declare("runtime", Layout::literal("c"));
        assert!(vars.runtime_variables().is_empty());
    }
}
