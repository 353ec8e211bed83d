use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::group::Group;
use crate::model::{Classification, ClassificationMeta, User};
use crate::strategy::{Strategy, StrategyRun};
use crate::summary::compute_summary;

/// Times the user pool is reshuffled before every strategy run.
pub const USER_SHUFFLES: usize = 7;

/// Shared mutable state every strategy in a pipeline sees: the live group
/// list and the shuffle source.
#[derive(Debug)]
pub struct PipelineContext<R> {
    pub groups: Vec<Group>,
    pub(crate) rng: R,
}

impl<R: Rng> PipelineContext<R> {
    pub fn new(groups: Vec<Group>, rng: R) -> Self {
        Self { groups, rng }
    }
}

/// One entry of the configured pipeline. A step that names no known
/// strategy is kept so the run can log and skip it.
#[derive(Debug, Clone)]
pub enum PipelineStep {
    Strategy(Arc<Strategy>),
    Unresolved(String),
}

impl PipelineStep {
    pub fn label(&self) -> &str {
        match self {
            Self::Strategy(strategy) => strategy.name(),
            Self::Unresolved(name) => name,
        }
    }
}

impl From<Strategy> for PipelineStep {
    fn from(strategy: Strategy) -> Self {
        Self::Strategy(Arc::new(strategy))
    }
}

impl From<Arc<Strategy>> for PipelineStep {
    fn from(strategy: Arc<Strategy>) -> Self {
        Self::Strategy(strategy)
    }
}

/// Runs an ordered list of strategies over a user pool.
pub struct Classifier<R = StdRng> {
    users: Vec<User>,
    steps: Vec<PipelineStep>,
    ctx: PipelineContext<R>,
    summary_attribute: String,
}

impl Classifier<StdRng> {
    /// Classifier with an entropy-seeded shuffle source.
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self::with_rng(steps, StdRng::from_entropy())
    }

    /// Classifier whose shuffles are fully reproducible.
    pub fn seeded(steps: Vec<PipelineStep>, seed: u64) -> Self {
        Self::with_rng(steps, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Classifier<R> {
    pub fn with_rng(steps: Vec<PipelineStep>, rng: R) -> Self {
        let names: Vec<&str> = steps.iter().map(PipelineStep::label).collect();
        info!("Setup classifier using: {}", names.join(", "));
        Self {
            users: Vec::new(),
            steps,
            ctx: PipelineContext::new(Vec::new(), rng),
            summary_attribute: "timezone".into(),
        }
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    pub fn with_summary_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.summary_attribute = attribute.into();
        self
    }

    pub fn set_users(&mut self, users: Vec<User>) {
        self.users = users;
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn groups(&self) -> &[Group] {
        &self.ctx.groups
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Every member of every group, cleared groups contributing nothing.
    pub fn grouped_users(&self) -> Vec<&User> {
        self.ctx.groups.iter().flat_map(|g| g.members()).collect()
    }

    /// Pool minus grouped users, in current pool order. Recomputed on every
    /// call.
    pub fn ungrouped_users(&self) -> Vec<&User> {
        let grouped: HashSet<&str> = self
            .ctx
            .groups
            .iter()
            .flat_map(|g| g.members())
            .map(|u| u.id.as_str())
            .collect();
        self.users
            .iter()
            .filter(|u| !grouped.contains(u.id.as_str()))
            .collect()
    }

    fn shuffle_users(&mut self) {
        for _ in 0..USER_SHUFFLES {
            self.users.shuffle(&mut self.ctx.rng);
        }
    }

    /// Run one pipeline step against the current ungrouped set. Unresolved
    /// steps are logged and skipped.
    pub fn run(&mut self, step: &PipelineStep) -> Option<StrategyRun> {
        let strategy = match step {
            PipelineStep::Strategy(strategy) => Arc::clone(strategy),
            PipelineStep::Unresolved(name) => {
                error!("{name} is not a valid matching strategy");
                return None;
            }
        };

        info!("Running matching strategy: {}", strategy.name());
        let ungrouped: Vec<User> = self.ungrouped_users().into_iter().cloned().collect();
        let run = strategy.setup(ungrouped, &mut self.ctx).run_all();
        debug!(
            "{}: {} matched, {} unmatched, {} groups ({} created, {} folded)",
            run.strategy,
            run.matched,
            run.unmatched,
            run.groups_after,
            run.groups_created,
            run.groups_folded
        );
        Some(run)
    }

    /// Run every step in order, then summarize.
    pub fn classify(&mut self) -> Classification {
        info!("Started classifying {} users", self.users.len());
        let steps = self.steps.clone();
        let mut runs = Vec::with_capacity(steps.len());

        for step in &steps {
            self.shuffle_users();
            if let Some(run) = self.run(step) {
                runs.push(run);
            }
        }

        let summary = compute_summary(&self.users, &self.ctx.groups, &self.summary_attribute);
        if summary.ungrouped_users > 0 {
            warn!(
                "There are {} users that were not grouped",
                summary.ungrouped_users
            );
            warn!("They are: {}", summary.ungrouped_ids.join(", "));
        }

        Classification {
            meta: ClassificationMeta {
                pipeline: steps.iter().map(|s| s.label().to_string()).collect(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            summary,
            runs,
            groups: self.ctx.groups.clone(),
        }
    }
}
