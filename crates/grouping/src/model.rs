use std::collections::BTreeMap;

use serde::Serialize;

use crate::group::Group;
use crate::strategy::StrategyRun;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A single user from the pool. Identity is `id`; everything else is an
/// open set of named attributes read by name at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attribute value by name. Missing attributes read as "".
    pub fn attr(&self, name: &str) -> &str {
        self.attributes.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn timezone(&self) -> &str {
        self.attr("timezone")
    }

    pub fn expertise(&self) -> &str {
        self.attr("expertise")
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationSummary {
    pub total_users: usize,
    pub grouped_users: usize,
    pub ungrouped_users: usize,
    pub ungrouped_ids: Vec<String>,
    pub total_groups: usize,
    pub empty_groups: usize,
    /// Group size → number of groups with that many members.
    pub groups_by_size: BTreeMap<usize, usize>,
    /// Attribute the uniqueness counts below are computed over.
    pub attribute: String,
    /// Distinct derived values across non-empty groups.
    pub unique_group_values: usize,
    /// Distinct attribute values across grouped users.
    pub unique_user_values: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationMeta {
    pub pipeline: Vec<String>,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub meta: ClassificationMeta,
    pub summary: ClassificationSummary,
    pub runs: Vec<StrategyRun>,
    pub groups: Vec<Group>,
}
