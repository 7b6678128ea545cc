//! Download group planning.
//!
//! A group is a named tag selection that spans every package. Planning
//! probes each package once for the default group and once per remote
//! group, then sums the per-package totals by group name:
//!
//! ```text
//!              main          dlc_maps        plan
//! #all       12 / 40MB     3 / 9MB     ─►  #all   15 / 49MB
//! ui          5 / 1MB      0           ─►  ui      5 / 1MB
//! audio       0            0                (omitted)
//! ```
//!
//! When a group was selected on a previous run only that group is planned.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PatchError, PatchResult};
use crate::package::PackageEntry;

/// Name of the group that selects every pending file.
pub const DEFAULT_GROUP_TAG: &str = "#all";

/// A named, tag-selected partition of the pending files.
///
/// Totals are recomputed on every planning pass; only the name and tags are
/// persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(rename = "groupName")]
    pub group_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "totalCount", default, skip_serializing_if = "is_zero_count")]
    pub total_count: usize,
    #[serde(rename = "totalBytes", default, skip_serializing_if = "is_zero_bytes")]
    pub total_bytes: u64,
}

fn is_zero_count(v: &usize) -> bool {
    *v == 0
}

fn is_zero_bytes(v: &u64) -> bool {
    *v == 0
}

impl GroupInfo {
    pub fn new(group_name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            group_name: group_name.into(),
            tags,
            total_count: 0,
            total_bytes: 0,
        }
    }

    /// The group selecting every pending file.
    pub fn all() -> Self {
        Self::new(DEFAULT_GROUP_TAG, Vec::new())
    }

    pub fn is_default(&self) -> bool {
        self.group_name == DEFAULT_GROUP_TAG
    }

    /// Tag filter for [`create_downloader`](crate::package::PackageHandle::create_downloader).
    ///
    /// The default group always selects everything, whatever tags it carries.
    pub fn tag_filter(&self) -> Option<&[String]> {
        if self.is_default() || self.tags.is_empty() {
            None
        } else {
            Some(&self.tags)
        }
    }
}

/// Remote descriptor of the available download groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(rename = "GROUP_INFOS", default)]
    pub group_infos: Vec<GroupInfo>,
}

impl PatchConfig {
    pub fn from_json(text: &str, source_name: &str) -> PatchResult<Self> {
        serde_json::from_str(text).map_err(|e| PatchError::InvalidPatchConfig {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Planned groups in first-seen order, keyed by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPlan {
    groups: Vec<GroupInfo>,
}

impl GroupPlan {
    /// Add totals to `name`, creating the group on first sight.
    pub fn accumulate(&mut self, name: &str, tags: &[String], count: usize, bytes: u64) {
        match self.groups.iter_mut().find(|g| g.group_name == name) {
            Some(group) => {
                group.total_count += count;
                group.total_bytes += bytes;
            }
            None => self.groups.push(GroupInfo {
                group_name: name.to_string(),
                tags: tags.to_vec(),
                total_count: count,
                total_bytes: bytes,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.group_name == name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupInfo> {
        self.groups.iter()
    }

    pub fn into_groups(self) -> Vec<GroupInfo> {
        self.groups
    }
}

/// Builds a [`GroupPlan`] from probe downloaders.
#[derive(Debug, Clone, Copy)]
pub struct DownloadGroupPlanner {
    max_concurrency: usize,
    max_retry: u32,
}

impl DownloadGroupPlanner {
    pub fn new(max_concurrency: usize, max_retry: u32) -> Self {
        Self {
            max_concurrency,
            max_retry,
        }
    }

    /// Plan groups across `packages`.
    ///
    /// With `last_selected` set, only that group is planned. Groups with no
    /// pending files are left out, so an empty plan means nothing to download.
    pub fn plan(
        &self,
        packages: &[PackageEntry],
        remote_groups: &[GroupInfo],
        last_selected: Option<&GroupInfo>,
    ) -> PatchResult<GroupPlan> {
        let candidates = candidate_groups(remote_groups, last_selected);
        let mut plan = GroupPlan::default();

        for entry in packages {
            for group in &candidates {
                let probe = entry
                    .handle
                    .create_downloader(group.tag_filter(), self.max_concurrency, self.max_retry)
                    .map_err(|source| PatchError::CreateDownloader {
                        package: entry.name().to_string(),
                        source,
                    })?;

                let (count, bytes) = (probe.total_count(), probe.total_bytes());
                debug!(
                    package = %entry.name(),
                    group = %group.group_name,
                    count,
                    bytes,
                    "Probed group"
                );
                if count > 0 {
                    plan.accumulate(&group.group_name, &group.tags, count, bytes);
                }
            }
        }

        Ok(plan)
    }

    /// Totals of one fixed group across `packages`.
    pub fn measure(&self, packages: &[PackageEntry], group: &GroupInfo) -> PatchResult<GroupInfo> {
        let mut measured = GroupInfo::new(group.group_name.clone(), group.tags.clone());
        for entry in packages {
            let probe = entry
                .handle
                .create_downloader(group.tag_filter(), self.max_concurrency, self.max_retry)
                .map_err(|source| PatchError::CreateDownloader {
                    package: entry.name().to_string(),
                    source,
                })?;
            measured.total_count += probe.total_count();
            measured.total_bytes += probe.total_bytes();
        }
        Ok(measured)
    }
}

/// Groups to probe, default group first, duplicates dropped.
fn candidate_groups(remote_groups: &[GroupInfo], last_selected: Option<&GroupInfo>) -> Vec<GroupInfo> {
    let mut candidates = vec![GroupInfo::all()];
    for group in remote_groups {
        if candidates.iter().any(|c| c.group_name == group.group_name) {
            warn!(group = %group.group_name, "Ignoring duplicate group name in patch config");
            continue;
        }
        candidates.push(GroupInfo::new(group.group_name.clone(), group.tags.clone()));
    }

    match last_selected {
        None => candidates,
        Some(last) => {
            let resumed: Vec<GroupInfo> = candidates
                .into_iter()
                .filter(|c| c.group_name == last.group_name)
                .collect();
            if resumed.is_empty() {
                warn!(group = %last.group_name, "Last selected group is no longer published");
            }
            resumed
        }
    }
}
