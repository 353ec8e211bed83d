use std::collections::{BTreeMap, HashSet};

use crate::group::Group;
use crate::model::{ClassificationSummary, User};

/// Compute summary statistics for a finished (or in-progress) pipeline.
pub fn compute_summary(users: &[User], groups: &[Group], attribute: &str) -> ClassificationSummary {
    let grouped_ids: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.members())
        .map(|u| u.id.as_str())
        .collect();

    let ungrouped_ids: Vec<String> = users
        .iter()
        .filter(|u| !grouped_ids.contains(u.id.as_str()))
        .map(|u| u.id.clone())
        .collect();

    let mut groups_by_size: BTreeMap<usize, usize> = BTreeMap::new();
    for group in groups {
        *groups_by_size.entry(group.len()).or_insert(0) += 1;
    }

    let unique_group_values: HashSet<&str> = groups
        .iter()
        .filter(|g| !g.is_empty())
        .map(|g| g.derived(attribute))
        .collect();

    let unique_user_values: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.members())
        .map(|u| u.attr(attribute))
        .collect();

    ClassificationSummary {
        total_users: users.len(),
        grouped_users: groups.iter().map(Group::len).sum(),
        ungrouped_users: ungrouped_ids.len(),
        ungrouped_ids,
        total_groups: groups.len(),
        empty_groups: groups.iter().filter(|g| g.is_empty()).count(),
        groups_by_size,
        attribute: attribute.to_string(),
        unique_group_values: unique_group_values.len(),
        unique_user_values: unique_user_values.len(),
    }
}
