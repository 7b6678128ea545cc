//! Shared execution context of one orchestration instance.

use super::planner::GroupInfo;
use crate::package::PackageEntry;

/// Blackboard the orchestrator passes to every state handler.
///
/// Owned by the orchestrator task; nothing else mutates it.
#[derive(Debug)]
pub struct PatchContext {
    /// Packages in caller-supplied order.
    pub packages: Vec<PackageEntry>,
    /// Resolved package versions, aligned by index with `packages` once the
    /// version pass has succeeded.
    pub package_versions: Vec<String>,
    /// App version confirmed by the version gate.
    pub app_version: Option<String>,
    /// Group chosen for the main download.
    pub selected_group: Option<GroupInfo>,
    /// Failed repairs still reported before repair proceeds anyway.
    pub repair_budget: u32,
    repair_budget_limit: u32,
}

impl PatchContext {
    pub fn new(packages: Vec<PackageEntry>, repair_budget: u32) -> Self {
        Self {
            packages,
            package_versions: Vec::new(),
            app_version: None,
            selected_group: None,
            repair_budget,
            repair_budget_limit: repair_budget,
        }
    }

    pub fn reset_repair_budget(&mut self) {
        self.repair_budget = self.repair_budget_limit;
    }

    pub fn package_names(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name().to_string()).collect()
    }

    /// Whether every package has a resolved version.
    pub fn versions_resolved(&self) -> bool {
        self.package_versions.len() == self.packages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_budget_resets_to_limit() {
        let mut ctx = PatchContext::new(Vec::new(), 2);
        ctx.repair_budget = 0;
        ctx.reset_repair_budget();
        assert_eq!(ctx.repair_budget, 2);
    }

    #[test]
    fn test_versions_resolved_tracks_package_count() {
        let mut ctx = PatchContext::new(Vec::new(), 1);
        assert!(ctx.versions_resolved());
        ctx.package_versions.push("3".to_string());
        assert!(!ctx.versions_resolved());
    }
}
