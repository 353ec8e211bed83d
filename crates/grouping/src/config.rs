use std::collections::BTreeMap;
use std::sync::Arc;

use log::LevelFilter;
use serde::Deserialize;

use crate::classifier::PipelineStep;
use crate::error::GroupingError;
use crate::group::Group;
use crate::report::ReportOptions;
use crate::rules::RuleSpec;
use crate::source::UserFilter;
use crate::strategy::{
    BulkCreate, ExplicitGroups, FoldSmallGroups, GroupBatch, SeedDistribution, Strategy,
    StrategyKind, TargetedMatch,
};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Shuffle seed. Entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Default log level for front ends ("error" .. "trace").
    #[serde(default)]
    pub log_level: Option<String>,
    /// Strategy names, in run order. Names may repeat.
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub users: Option<UserSourceConfig>,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyConfig>,
}

// ---------------------------------------------------------------------------
// Users + Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UserSourceConfig {
    pub file: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_id_column() -> String {
    "id".into()
}

impl UserSourceConfig {
    pub fn to_filter(&self) -> UserFilter {
        UserFilter {
            criteria: self.filter.clone(),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_attribute")]
    pub attribute: String,
    #[serde(default = "default_member_fields")]
    pub member_fields: Vec<String>,
}

fn default_report_attribute() -> String {
    "timezone".into()
}

fn default_member_fields() -> Vec<String> {
    vec!["email".into(), "timezone".into(), "expertise".into()]
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            attribute: default_report_attribute(),
            member_fields: default_member_fields(),
        }
    }
}

impl ReportConfig {
    pub fn to_options(&self) -> ReportOptions {
        ReportOptions {
            attribute: self.attribute.clone(),
            member_fields: self.member_fields.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Targeted {
        rules: Vec<RuleSpec>,
        #[serde(default)]
        create_on_not_found: bool,
        #[serde(default = "default_true")]
        respect_target_sizes: bool,
    },
    BulkCreate {
        groups: Vec<GroupBatch>,
    },
    Seed {
        #[serde(default)]
        attribute: Option<String>,
    },
    Fold {
        #[serde(default)]
        hard_minimum: Option<usize>,
        #[serde(default)]
        relative_minimum: Option<usize>,
    },
    Explicit {
        groups: Vec<BTreeMap<String, toml::Value>>,
    },
}

fn default_true() -> bool {
    true
}

fn property_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl StrategyConfig {
    pub fn build(&self, name: &str) -> Strategy {
        let kind = match self {
            Self::Targeted {
                rules,
                create_on_not_found,
                respect_target_sizes,
            } => StrategyKind::Targeted(TargetedMatch {
                rules: rules.iter().map(RuleSpec::compile).collect(),
                create_on_not_found: *create_on_not_found,
                respect_target_sizes: *respect_target_sizes,
            }),
            Self::BulkCreate { groups } => StrategyKind::BulkCreate(BulkCreate {
                batches: groups.clone(),
            }),
            Self::Seed { attribute } => StrategyKind::Seed(SeedDistribution {
                attribute: attribute.clone(),
            }),
            Self::Fold {
                hard_minimum,
                relative_minimum,
            } => StrategyKind::Fold(FoldSmallGroups {
                hard_minimum: *hard_minimum,
                relative_minimum: *relative_minimum,
            }),
            Self::Explicit { groups } => StrategyKind::Explicit(ExplicitGroups {
                groups: groups
                    .iter()
                    .map(|props| {
                        Group::with_properties(
                            props
                                .iter()
                                .map(|(k, v)| (k.clone(), property_value(v)))
                                .collect(),
                        )
                    })
                    .collect(),
            }),
        };
        Strategy::new(name, kind)
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, GroupingError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| GroupingError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GroupingError> {
        if self.pipeline.is_empty() {
            return Err(GroupingError::ConfigValidation(
                "pipeline must name at least one strategy".into(),
            ));
        }

        for (name, strategy) in &self.strategies {
            match strategy {
                StrategyConfig::Targeted { rules, .. } if rules.is_empty() => {
                    return Err(GroupingError::ConfigValidation(format!(
                        "strategy '{name}': targeted strategy needs at least one rule"
                    )));
                }
                StrategyConfig::BulkCreate { groups } => {
                    if groups.iter().any(|b| b.size == 0) {
                        return Err(GroupingError::ConfigValidation(format!(
                            "strategy '{name}': group size must be at least 1"
                        )));
                    }
                }
                StrategyConfig::Fold {
                    hard_minimum: None,
                    relative_minimum: None,
                } => {
                    return Err(GroupingError::ConfigValidation(format!(
                        "strategy '{name}': fold needs hard_minimum or relative_minimum"
                    )));
                }
                _ => {}
            }
        }

        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Option<LevelFilter>, GroupingError> {
        match &self.log_level {
            None => Ok(None),
            Some(level) => level.parse::<LevelFilter>().map(Some).map_err(|_| {
                GroupingError::ConfigValidation(format!("unknown log_level '{level}'"))
            }),
        }
    }

    /// Pipeline entries that name no defined strategy. These are skipped
    /// at run time, not rejected.
    pub fn unresolved_steps(&self) -> Vec<&str> {
        self.pipeline
            .iter()
            .filter(|name| !self.strategies.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    /// Build each strategy once; repeated pipeline entries share the same
    /// instance.
    pub fn steps(&self) -> Vec<PipelineStep> {
        let built: BTreeMap<&str, Arc<Strategy>> = self
            .strategies
            .iter()
            .map(|(name, cfg)| (name.as_str(), Arc::new(cfg.build(name))))
            .collect();

        self.pipeline
            .iter()
            .map(|name| match built.get(name.as_str()) {
                Some(strategy) => PipelineStep::Strategy(Arc::clone(strategy)),
                None => PipelineStep::Unresolved(name.clone()),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
