use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classifier::PipelineContext;
use crate::group::Group;
use crate::model::User;
use crate::rules::Rule;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    BeforeMatch,
    Match,
    AfterMatch,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeMatch => write!(f, "before_match"),
            Self::Match => write!(f, "match"),
            Self::AfterMatch => write!(f, "after_match"),
        }
    }
}

/// Which lifecycle hooks a strategy implements. Missing hooks degrade to a
/// logged no-op in the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before_match: bool,
    pub match_user: bool,
    pub after_match: bool,
}

impl Hooks {
    pub const BEFORE_ONLY: Hooks = Hooks {
        before_match: true,
        match_user: false,
        after_match: false,
    };

    pub const MATCH_ONLY: Hooks = Hooks {
        before_match: false,
        match_user: true,
        after_match: false,
    };

    pub fn implements(&self, hook: Hook) -> bool {
        match hook {
            Hook::BeforeMatch => self.before_match,
            Hook::Match => self.match_user,
            Hook::AfterMatch => self.after_match,
        }
    }
}

/// Result of a `match` hook for one user.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTarget {
    /// Index into the live (already shuffled) group list.
    Existing(usize),
    /// A fabricated group, appended to the live list with the user in it.
    New(Group),
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Assigns each user to the first visited group any rule accepts.
#[derive(Debug, Clone)]
pub struct TargetedMatch {
    pub rules: Vec<Rule>,
    pub create_on_not_found: bool,
    pub respect_target_sizes: bool,
}

impl Default for TargetedMatch {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            create_on_not_found: false,
            respect_target_sizes: true,
        }
    }
}

impl TargetedMatch {
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// First-group-wins: groups are visited in the order given (the driver
    /// shuffles them per user) and the first eligible group for which any
    /// rule holds is chosen.
    pub fn find(&self, user: &User, groups: &[Group]) -> Option<MatchTarget> {
        let found = groups.iter().position(|group| {
            (!self.respect_target_sizes || group.has_capacity())
                && self.rules.iter().any(|rule| rule.matches(user, group))
        });

        match found {
            Some(index) => Some(MatchTarget::Existing(index)),
            None if self.create_on_not_found => Some(MatchTarget::New(Group::new())),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupBatch {
    pub size: usize,
    pub count: usize,
}

/// Creates `count` empty groups of each configured target size.
#[derive(Debug, Clone, Default)]
pub struct BulkCreate {
    pub batches: Vec<GroupBatch>,
}

impl BulkCreate {
    pub fn create(&self, groups: &mut Vec<Group>) {
        for batch in &self.batches {
            for _ in 0..batch.count {
                groups.push(Group::with_target_size(batch.size));
            }
        }
    }
}

/// Seeds each empty group with one representative of the most frequent
/// remaining attribute value.
#[derive(Debug, Clone, Default)]
pub struct SeedDistribution {
    pub attribute: Option<String>,
}

impl SeedDistribution {
    pub fn distribute(&self, users: &[User], groups: &mut [Group]) {
        let Some(attribute) = self.attribute.as_deref() else {
            return;
        };

        // (value, frequency, first holder), in order of first appearance
        let mut buckets: Vec<(&str, usize, &User)> = Vec::new();
        for user in users {
            let value = user.attr(attribute);
            match buckets.iter_mut().find(|(v, _, _)| *v == value) {
                Some(bucket) => bucket.1 += 1,
                None => buckets.push((value, 1, user)),
            }
        }
        buckets.sort_by_key(|(_, frequency, _)| *frequency);

        for group in groups.iter_mut().filter(|g| g.is_empty()) {
            let Some((value, frequency, representative)) = buckets.pop() else {
                break;
            };
            debug!(
                "Seeding group with {} ({attribute} = {value:?}, {frequency} users)",
                representative.id
            );
            group.add_user(representative.clone());
        }
    }
}

/// Clears groups that ended up too small, returning their members to the
/// ungrouped pool for later strategies.
#[derive(Debug, Clone, Default)]
pub struct FoldSmallGroups {
    pub hard_minimum: Option<usize>,
    pub relative_minimum: Option<usize>,
}

impl FoldSmallGroups {
    pub fn should_fold(&self, group: &Group) -> bool {
        let below_hard = self.hard_minimum.is_some_and(|min| group.len() < min);
        let below_relative = self.relative_minimum.is_some_and(|rel| {
            group
                .target_size()
                .checked_sub(rel)
                .is_some_and(|threshold| group.len() < threshold)
        });
        below_hard || below_relative
    }

    /// Clears every undersized non-empty group. Returns how many were
    /// folded.
    pub fn fold(&self, groups: &mut [Group]) -> usize {
        let mut folded = 0;
        for group in groups.iter_mut() {
            if !group.is_empty() && self.should_fold(group) {
                debug!(
                    "Folding group with {} members (target {})",
                    group.len(),
                    group.target_size()
                );
                group.clear();
                folded += 1;
            }
        }
        folded
    }
}

/// Appends a fixed set of pre-built groups.
#[derive(Debug, Clone, Default)]
pub struct ExplicitGroups {
    pub groups: Vec<Group>,
}

impl ExplicitGroups {
    pub fn append(&self, groups: &mut Vec<Group>) {
        for group in &self.groups {
            debug!("Created group: {:?}", group.properties());
            groups.push(group.clone());
        }
    }
}

pub type GroupHookFn = dyn Fn(&[User], &mut Vec<Group>) + Send + Sync;
pub type MatchHookFn = dyn Fn(&User, &[Group]) -> Option<MatchTarget> + Send + Sync;

/// Caller-supplied hooks. Any of them may be left out.
#[derive(Clone, Default)]
pub struct CustomHooks {
    pub before_match: Option<Arc<GroupHookFn>>,
    pub match_user: Option<Arc<MatchHookFn>>,
    pub after_match: Option<Arc<GroupHookFn>>,
}

impl fmt::Debug for CustomHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomHooks")
            .field("before_match", &self.before_match.is_some())
            .field("match_user", &self.match_user.is_some())
            .field("after_match", &self.after_match.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum StrategyKind {
    Targeted(TargetedMatch),
    BulkCreate(BulkCreate),
    Seed(SeedDistribution),
    Fold(FoldSmallGroups),
    Explicit(ExplicitGroups),
    Custom(CustomHooks),
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// A named, configured policy. Holds no state between runs besides its
/// configuration.
#[derive(Debug, Clone)]
pub struct Strategy {
    name: String,
    kind: StrategyKind,
}

impl Strategy {
    pub fn new(name: impl Into<String>, kind: StrategyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn hooks(&self) -> Hooks {
        match &self.kind {
            StrategyKind::Targeted(_) => Hooks::MATCH_ONLY,
            StrategyKind::BulkCreate(_)
            | StrategyKind::Seed(_)
            | StrategyKind::Fold(_)
            | StrategyKind::Explicit(_) => Hooks::BEFORE_ONLY,
            StrategyKind::Custom(custom) => Hooks {
                before_match: custom.before_match.is_some(),
                match_user: custom.match_user.is_some(),
                after_match: custom.after_match.is_some(),
            },
        }
    }

    /// Bind this strategy to one run's ungrouped snapshot and the live
    /// pipeline context.
    pub fn setup<'a, R: Rng>(
        &'a self,
        users: Vec<User>,
        ctx: &'a mut PipelineContext<R>,
    ) -> BoundStrategy<'a, R> {
        let run = StrategyRun {
            strategy: self.name.clone(),
            users_offered: users.len(),
            executed: Vec::new(),
            skipped: Vec::new(),
            matched: 0,
            unmatched: 0,
            groups_before: ctx.groups.len(),
            groups_after: ctx.groups.len(),
            groups_created: 0,
            groups_folded: 0,
            members_before: member_count(&ctx.groups),
            members_after: member_count(&ctx.groups),
        };
        BoundStrategy {
            strategy: self,
            users,
            ctx,
            run,
        }
    }

    /// Returns the number of groups folded.
    fn before_match(&self, users: &[User], groups: &mut Vec<Group>) -> usize {
        match &self.kind {
            StrategyKind::BulkCreate(bulk) => bulk.create(groups),
            StrategyKind::Seed(seed) => seed.distribute(users, groups),
            StrategyKind::Fold(fold) => return fold.fold(groups),
            StrategyKind::Explicit(explicit) => explicit.append(groups),
            StrategyKind::Custom(CustomHooks {
                before_match: Some(hook),
                ..
            }) => hook(users, groups),
            _ => {}
        }
        0
    }

    fn match_user(&self, user: &User, groups: &[Group]) -> Option<MatchTarget> {
        match &self.kind {
            StrategyKind::Targeted(targeted) => targeted.find(user, groups),
            StrategyKind::Custom(CustomHooks {
                match_user: Some(hook),
                ..
            }) => hook(user, groups),
            _ => None,
        }
    }

    fn after_match(&self, users: &[User], groups: &mut Vec<Group>) {
        if let StrategyKind::Custom(CustomHooks {
            after_match: Some(hook),
            ..
        }) = &self.kind
        {
            hook(users, groups);
        }
    }
}

fn member_count(groups: &[Group]) -> usize {
    groups.iter().map(Group::len).sum()
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// What one strategy run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyRun {
    pub strategy: String,
    pub users_offered: usize,
    pub executed: Vec<Hook>,
    pub skipped: Vec<Hook>,
    pub matched: usize,
    pub unmatched: usize,
    pub groups_before: usize,
    pub groups_after: usize,
    /// Groups appended to the list, by creation hooks or by matching.
    pub groups_created: usize,
    /// Groups cleared by folding. They stay in the list.
    pub groups_folded: usize,
    pub members_before: usize,
    pub members_after: usize,
}

/// A strategy bound to a single run (the `setup` state).
pub struct BoundStrategy<'a, R> {
    strategy: &'a Strategy,
    users: Vec<User>,
    ctx: &'a mut PipelineContext<R>,
    run: StrategyRun,
}

impl<'a, R: Rng> BoundStrategy<'a, R> {
    /// before → match → after, unconditionally and in that order.
    pub fn run_all(mut self) -> StrategyRun {
        self.run_before_match();
        self.run_match();
        self.run_after_match();
        self.finish()
    }

    pub fn run_before_match(&mut self) {
        if self.skip_unless_implemented(Hook::BeforeMatch) {
            return;
        }
        self.run.groups_folded += self.strategy.before_match(&self.users, &mut self.ctx.groups);
        self.run.executed.push(Hook::BeforeMatch);
    }

    pub fn run_match(&mut self) {
        if self.skip_unless_implemented(Hook::Match) {
            return;
        }
        let name = self.strategy.name();

        for user in &self.users {
            self.ctx.groups.shuffle(&mut self.ctx.rng);
            debug!("Matching {} using {name}", user.id);

            match self.strategy.match_user(user, &self.ctx.groups) {
                Some(MatchTarget::Existing(index)) => match self.ctx.groups.get_mut(index) {
                    Some(group) => {
                        group.add_user(user.clone());
                        debug!("Matched {} to group {:?}", user.id, group.properties());
                        self.run.matched += 1;
                    }
                    None => {
                        warn!("{name} returned group index {index} out of range; {} left unmatched", user.id);
                        self.run.unmatched += 1;
                    }
                },
                Some(MatchTarget::New(mut group)) => {
                    group.add_user(user.clone());
                    debug!("Matched {} to new group {:?}", user.id, group.properties());
                    self.ctx.groups.push(group);
                    self.run.matched += 1;
                }
                None => {
                    debug!("Could not find a group for user: {}", user.id);
                    self.run.unmatched += 1;
                }
            }
            debug!("Number of available groups: {}", self.ctx.groups.len());
        }
        self.run.executed.push(Hook::Match);
    }

    pub fn run_after_match(&mut self) {
        if self.skip_unless_implemented(Hook::AfterMatch) {
            return;
        }
        self.strategy.after_match(&self.users, &mut self.ctx.groups);
        self.run.executed.push(Hook::AfterMatch);
    }

    pub fn finish(mut self) -> StrategyRun {
        self.run.groups_after = self.ctx.groups.len();
        self.run.groups_created = self.run.groups_after.saturating_sub(self.run.groups_before);
        self.run.members_after = member_count(&self.ctx.groups);
        self.run
    }

    fn skip_unless_implemented(&mut self, hook: Hook) -> bool {
        if self.strategy.hooks().implements(hook) {
            return false;
        }
        warn!("'{hook}' not implemented for {}", self.strategy.name());
        self.run.skipped.push(hook);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx(groups: Vec<Group>) -> PipelineContext<StdRng> {
        PipelineContext::new(groups, StdRng::seed_from_u64(7))
    }

    fn tz(id: &str, tz: &str) -> User {
        User::new(id).with_attr("timezone", tz)
    }

    fn seeded_group(target: usize, members: &[User]) -> Group {
        let mut group = Group::with_target_size(target);
        for member in members {
            group.add_user(member.clone());
        }
        group
    }

    fn same_tz() -> Rule {
        RuleSpec::Same {
            attribute: "timezone".into(),
        }
        .compile()
    }

    #[test]
    fn hooks_per_variant() {
        let targeted = Strategy::new("t", StrategyKind::Targeted(TargetedMatch::default()));
        assert_eq!(targeted.hooks(), Hooks::MATCH_ONLY);
        let fold = Strategy::new("f", StrategyKind::Fold(FoldSmallGroups::default()));
        assert_eq!(fold.hooks(), Hooks::BEFORE_ONLY);
        let custom = Strategy::new("c", StrategyKind::Custom(CustomHooks::default()));
        assert_eq!(custom.hooks(), Hooks::default());
    }

    #[test]
    fn missing_hooks_are_skipped_not_errors() {
        let strategy = Strategy::new("bulk", StrategyKind::BulkCreate(BulkCreate {
            batches: vec![GroupBatch { size: 4, count: 2 }],
        }));
        let mut ctx = ctx(Vec::new());
        let run = strategy.setup(vec![tz("u1", "A")], &mut ctx).run_all();

        assert_eq!(run.executed, vec![Hook::BeforeMatch]);
        assert_eq!(run.skipped, vec![Hook::Match, Hook::AfterMatch]);
        assert_eq!(run.matched, 0);
        assert_eq!(run.groups_after, 2);
        assert!(ctx.groups.iter().all(|g| g.target_size() == 4 && g.is_empty()));
    }

    #[test]
    fn targeted_respects_target_size() {
        let full = seeded_group(2, &[tz("a1", "A"), tz("a2", "A")]);
        let strategy = Strategy::new(
            "same tz",
            StrategyKind::Targeted(TargetedMatch::default().with_rule(same_tz())),
        );
        let mut ctx = ctx(vec![full]);
        let run = strategy.setup(vec![tz("a3", "A")], &mut ctx).run_all();

        assert_eq!(run.unmatched, 1);
        assert_eq!(ctx.groups[0].len(), 2);
    }

    #[test]
    fn targeted_ignores_size_when_not_respecting() {
        let full = seeded_group(2, &[tz("a1", "A"), tz("a2", "A")]);
        let targeted = TargetedMatch {
            respect_target_sizes: false,
            ..TargetedMatch::default()
        }
        .with_rule(same_tz());
        let strategy = Strategy::new("loose", StrategyKind::Targeted(targeted));
        let mut ctx = ctx(vec![full]);
        strategy.setup(vec![tz("a3", "A")], &mut ctx).run_all();
        assert_eq!(ctx.groups[0].len(), 3);
    }

    #[test]
    fn targeted_creates_group_when_configured() {
        let targeted = TargetedMatch {
            create_on_not_found: true,
            ..TargetedMatch::default()
        }
        .with_rule(same_tz());
        let strategy = Strategy::new("create", StrategyKind::Targeted(targeted));
        let mut ctx = ctx(Vec::new());
        let run = strategy
            .setup(vec![tz("a1", "A"), tz("b1", "B")], &mut ctx)
            .run_all();

        assert_eq!(run.matched, 2);
        assert_eq!(run.groups_created, 2);
        assert_eq!(run.groups_folded, 0);
        assert_eq!(ctx.groups.len(), 2);
        // Fabricated groups carry no target size, so same-tz users never
        // join them while sizes are respected.
        assert!(ctx.groups.iter().all(|g| g.len() == 1 && g.target_size() == 0));
    }

    #[test]
    fn targeted_without_match_leaves_user_out() {
        let strategy = Strategy::new(
            "same tz",
            StrategyKind::Targeted(TargetedMatch::default().with_rule(same_tz())),
        );
        let mut ctx = ctx(vec![seeded_group(5, &[tz("b1", "B")])]);
        let run = strategy.setup(vec![tz("a1", "A")], &mut ctx).run_all();
        assert_eq!(run.unmatched, 1);
        assert_eq!(run.members_after, run.members_before);
        assert_eq!(run.groups_created, 0);
    }

    #[test]
    fn seed_picks_most_frequent_value_first() {
        let users = vec![
            tz("a1", "A"),
            tz("b1", "B"),
            tz("b2", "B"),
            tz("c1", "C"),
            tz("b3", "B"),
        ];
        let seed = SeedDistribution {
            attribute: Some("timezone".into()),
        };
        let mut groups = vec![Group::with_target_size(3)];
        seed.distribute(&users, &mut groups);
        assert_eq!(groups[0].members()[0].id, "b1");
    }

    #[test]
    fn seed_only_touches_empty_groups_and_stops_when_buckets_run_out() {
        let users = vec![tz("a1", "A"), tz("b1", "B")];
        let seed = SeedDistribution {
            attribute: Some("timezone".into()),
        };
        let mut groups = vec![
            seeded_group(3, &[tz("x", "X")]),
            Group::with_target_size(3),
            Group::with_target_size(3),
            Group::with_target_size(3),
        ];
        seed.distribute(&users, &mut groups);

        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0].members()[0].id, "x");
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].len(), 1);
        assert!(groups[3].is_empty());
    }

    #[test]
    fn seed_without_attribute_is_noop() {
        let mut groups = vec![Group::with_target_size(3)];
        SeedDistribution::default().distribute(&[tz("a1", "A")], &mut groups);
        assert!(groups[0].is_empty());
    }

    #[test]
    fn fold_relative_minimum() {
        let fold = FoldSmallGroups {
            hard_minimum: None,
            relative_minimum: Some(2),
        };
        let members: Vec<User> = (0..9).map(|i| tz(&format!("u{i}"), "A")).collect();

        let seven = seeded_group(10, &members[..7]);
        let nine = seeded_group(10, &members[..9]);
        assert!(fold.should_fold(&seven));
        assert!(!fold.should_fold(&nine));

        let mut groups = vec![seven, nine];
        assert_eq!(fold.fold(&mut groups), 1);
        assert!(groups[0].is_empty());
        assert_eq!(groups[0].target_size(), 10);
        assert_eq!(groups[1].len(), 9);
    }

    #[test]
    fn fold_relative_never_fires_without_target() {
        let fold = FoldSmallGroups {
            hard_minimum: None,
            relative_minimum: Some(7),
        };
        let mut group = Group::new();
        group.add_user(tz("u1", "A"));
        assert!(!fold.should_fold(&group));
    }

    #[test]
    fn fold_hard_minimum() {
        let fold = FoldSmallGroups {
            hard_minimum: Some(3),
            relative_minimum: None,
        };
        let small = seeded_group(0, &[tz("u1", "A"), tz("u2", "A")]);
        let ok = seeded_group(0, &[tz("u1", "A"), tz("u2", "A"), tz("u3", "A")]);
        assert!(fold.should_fold(&small));
        assert!(!fold.should_fold(&ok));
    }

    #[test]
    fn explicit_groups_are_appended_with_properties() {
        let mut mentors = Group::with_target_size(8);
        mentors.set_property("track", "mentors");
        let strategy = Strategy::new(
            "mentors",
            StrategyKind::Explicit(ExplicitGroups {
                groups: vec![mentors],
            }),
        );
        let mut ctx = ctx(vec![Group::new()]);
        let run = strategy.setup(Vec::new(), &mut ctx).run_all();
        assert_eq!(run.groups_after, 2);
        assert_eq!(ctx.groups[1].property("track"), Some("mentors"));
    }

    #[test]
    fn custom_after_match_runs_last() {
        let hooks = CustomHooks {
            before_match: None,
            match_user: Some(Arc::new(|_: &User, groups: &[Group]| {
                if groups.is_empty() {
                    None
                } else {
                    Some(MatchTarget::Existing(0))
                }
            })),
            after_match: Some(Arc::new(|_: &[User], groups: &mut Vec<Group>| {
                for group in groups.iter_mut() {
                    group.set_property("closed", "true");
                }
            })),
        };
        let strategy = Strategy::new("custom", StrategyKind::Custom(hooks));
        let mut ctx = ctx(vec![Group::with_target_size(5)]);
        let run = strategy.setup(vec![tz("u1", "A")], &mut ctx).run_all();

        assert_eq!(run.executed, vec![Hook::Match, Hook::AfterMatch]);
        assert_eq!(run.skipped, vec![Hook::BeforeMatch]);
        assert_eq!(ctx.groups[0].len(), 1);
        assert_eq!(ctx.groups[0].property("closed"), Some("true"));
    }

    #[test]
    fn out_of_range_match_is_unmatched() {
        let hooks = CustomHooks {
            match_user: Some(Arc::new(|_: &User, _: &[Group]| Some(MatchTarget::Existing(99)))),
            ..CustomHooks::default()
        };
        let strategy = Strategy::new("broken", StrategyKind::Custom(hooks));
        let mut ctx = ctx(vec![Group::new()]);
        let run = strategy.setup(vec![tz("u1", "A")], &mut ctx).run_all();
        assert_eq!(run.unmatched, 1);
        assert!(ctx.groups[0].is_empty());
    }
}
