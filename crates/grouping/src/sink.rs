use std::collections::BTreeMap;

use log::info;
use serde::Serialize;

use crate::error::GroupingError;
use crate::group::Group;

/// A group as handed to persistence: ordered member ids plus the derived
/// timezone at the time of saving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedGroup {
    /// 1-based position in the classifier's group list.
    pub position: usize,
    pub member_ids: Vec<String>,
    pub timezone: String,
    pub target_size: usize,
    pub properties: BTreeMap<String, String>,
}

impl FinalizedGroup {
    pub fn from_group(position: usize, group: &Group) -> Self {
        Self {
            position,
            member_ids: group.members().iter().map(|u| u.id.clone()).collect(),
            timezone: group.timezone().to_string(),
            target_size: group.target_size(),
            properties: group.properties().clone(),
        }
    }
}

/// Durable storage for finished groups.
pub trait GroupSink {
    fn save(&mut self, group: &FinalizedGroup) -> Result<(), GroupingError>;
}

/// Hand every non-empty group to `sink`, in list order. Returns how many
/// groups were saved.
pub fn persist_groups(groups: &[Group], sink: &mut dyn GroupSink) -> Result<usize, GroupingError> {
    let mut saved = 0;
    for (index, group) in groups.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        sink.save(&FinalizedGroup::from_group(index + 1, group))?;
        saved += 1;
    }
    info!("Saved {saved} groups");
    Ok(saved)
}
