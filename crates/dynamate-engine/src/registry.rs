use std::collections::HashMap;

use dynamate_core::tools::ToolDefinition;
use dynamate_tools::{definitions, SchemaHints, ToolKind, Toolset};

/// Name lookup for one agent's tools. Built once from the toolset and never
/// mutated afterwards.
#[derive(Clone, Debug)]
pub struct ToolRegistry {
    toolset: Toolset,
    tools: HashMap<&'static str, ToolKind>,
}

impl ToolRegistry {
    pub fn for_toolset(toolset: Toolset) -> Self {
        let tools = toolset.kinds().iter().map(|&kind| (kind.name(), kind)).collect();
        Self { toolset, tools }
    }

    pub fn get(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn toolset(&self) -> Toolset {
        self.toolset
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Model-facing schema, in toolset order.
    pub fn definitions(&self, hints: &SchemaHints) -> Vec<ToolDefinition> {
        definitions(self.toolset, hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_registry() {
        let reg = ToolRegistry::for_toolset(Toolset::Planning);
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.get("fetch_and_save_pdb"), Some(ToolKind::FetchAndSavePdb));
        assert!(!reg.contains("run_tleap"));
        assert!(!reg.contains("frobnicate_structure"));
        assert_eq!(
            reg.names(),
            vec!["fetch_and_save_pdb", "find_input", "read_file", "search_papers"]
        );
    }

    #[test]
    fn execution_registry() {
        let reg = ToolRegistry::for_toolset(Toolset::Execution);
        assert_eq!(reg.len(), 16);
        assert_eq!(reg.get("run_gmxMMPBSA"), Some(ToolKind::RunGmxMmpbsa));
        assert!(!reg.contains("fetch_and_save_pdb"));
    }

    #[test]
    fn definitions_follow_registry() {
        let reg = ToolRegistry::for_toolset(Toolset::Execution);
        let defs = reg.definitions(&SchemaHints::new("/tmp/run"));
        assert_eq!(defs.len(), reg.len());
        assert!(defs.iter().all(|d| reg.contains(&d.name)));
    }
}
