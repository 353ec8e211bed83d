use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::group::Group;
use crate::model::User;

pub type RulePredicate = dyn Fn(&User, &Group) -> bool + Send + Sync;

/// A labelled `(user, group) -> bool` predicate used by targeted matching.
#[derive(Clone)]
pub struct Rule {
    label: String,
    predicate: Arc<RulePredicate>,
}

impl Rule {
    pub fn new(
        label: impl Into<String>,
        predicate: impl Fn(&User, &Group) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn matches(&self, user: &User, group: &Group) -> bool {
        (self.predicate)(user, group)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("label", &self.label).finish()
    }
}

// ---------------------------------------------------------------------------
// Declarative rules (config)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// User attribute equals the group's derived attribute.
    Same { attribute: String },
    /// Leading segments (before `separator`) are equal, e.g. "Europe" for
    /// "Europe/Paris" and "Europe/Berlin".
    SamePrefix {
        attribute: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// User's leading segment is `user` and the group's is `group`.
    PrefixPair {
        attribute: String,
        user: String,
        group: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Any group will do.
    Always,
}

fn default_separator() -> String {
    "/".into()
}

fn prefix<'a>(value: &'a str, separator: &str) -> &'a str {
    value.split(separator).next().unwrap_or("")
}

impl RuleSpec {
    pub fn compile(&self) -> Rule {
        match self.clone() {
            Self::Same { attribute } => {
                let label = format!("same {attribute}");
                Rule::new(label, move |user, group| {
                    user.attr(&attribute) == group.derived(&attribute)
                })
            }
            Self::SamePrefix { attribute, separator } => {
                let label = format!("same {attribute} prefix");
                Rule::new(label, move |user, group| {
                    prefix(user.attr(&attribute), &separator)
                        == prefix(group.derived(&attribute), &separator)
                })
            }
            Self::PrefixPair {
                attribute,
                user: user_prefix,
                group: group_prefix,
                separator,
            } => {
                let label = format!("{attribute} {user_prefix} joins {group_prefix}");
                Rule::new(label, move |user, group| {
                    prefix(user.attr(&attribute), &separator) == user_prefix
                        && prefix(group.derived(&attribute), &separator) == group_prefix
                })
            }
            Self::Always => Rule::new("always", |_, _| true),
        }
    }
}
