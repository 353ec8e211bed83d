//! Plain-text group report.
//!
//! Layout:
//!
//! ```text
//! Total Groups: 2
//!     Groups with 5 members: 2
//! Total Users to Group: 10
//! Total Grouped Users: 10
//! Unique Timezone Groups: 2
//! Unique Timezone Users: 2
//!
//! Group 1
//!     Target Size: 5
//!     Current Size: 5
//!     Timezone: A
//!     Users:
//!         User u1:        u1@example.com, A, novice
//! ```
//!
//! Indentation is tabs.

use std::fmt;
use std::path::Path;

use crate::error::GroupingError;
use crate::group::{Group, TARGET_SIZE};
use crate::model::ClassificationSummary;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Attribute shown per group and counted for uniqueness.
    pub attribute: String,
    /// Member attributes listed after each user id.
    pub member_fields: Vec<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            attribute: "timezone".into(),
            member_fields: vec!["email".into(), "timezone".into(), "expertise".into()],
        }
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// A report over one classification, rendered through `Display`.
pub struct Report<'a> {
    groups: &'a [Group],
    summary: &'a ClassificationSummary,
    options: &'a ReportOptions,
}

impl<'a> Report<'a> {
    pub fn new(
        groups: &'a [Group],
        summary: &'a ClassificationSummary,
        options: &'a ReportOptions,
    ) -> Self {
        Self { groups, summary, options }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;
        let label = title_case(&self.options.attribute);

        writeln!(f, "Total Groups: {}", self.groups.len())?;
        for (size, count) in &summary.groups_by_size {
            writeln!(f, "\tGroups with {size} members: {count}")?;
        }
        writeln!(f, "Total Users to Group: {}", summary.total_users)?;
        writeln!(f, "Total Grouped Users: {}", summary.grouped_users)?;
        writeln!(f, "Unique {label} Groups: {}", summary.unique_group_values)?;
        writeln!(f, "Unique {label} Users: {}", summary.unique_user_values)?;

        for (index, group) in self.groups.iter().enumerate() {
            writeln!(f, "\nGroup {}", index + 1)?;
            writeln!(f, "\tTarget Size: {}", group.property(TARGET_SIZE).unwrap_or(""))?;
            writeln!(f, "\tCurrent Size: {}", group.len())?;
            writeln!(f, "\t{label}: {}", group.derived(&self.options.attribute))?;
            writeln!(f, "\tUsers:")?;
            for user in group.members() {
                let fields: Vec<&str> = self
                    .options
                    .member_fields
                    .iter()
                    .map(|name| user.attr(name))
                    .collect();
                writeln!(f, "\t\tUser {}: \t\t{}", user.id, fields.join(", "))?;
            }
        }
        Ok(())
    }
}

pub fn render_report(
    groups: &[Group],
    summary: &ClassificationSummary,
    options: &ReportOptions,
) -> String {
    Report::new(groups, summary, options).to_string()
}

pub fn write_report(
    path: &Path,
    groups: &[Group],
    summary: &ClassificationSummary,
    options: &ReportOptions,
) -> Result<(), GroupingError> {
    std::fs::write(path, render_report(groups, summary, options))
        .map_err(|e| GroupingError::Io(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::summary::compute_summary;

    #[test]
    fn renders_header_and_group_blocks() {
        let alice = User::new("1")
            .with_attr("email", "alice@example.com")
            .with_attr("timezone", "Europe/Paris")
            .with_attr("expertise", "novice");
        let bob = User::new("2").with_attr("timezone", "Asia/Tokyo");

        let mut group = Group::with_target_size(20);
        group.add_user(alice.clone());
        let groups = vec![group, Group::with_target_size(40)];
        let summary = compute_summary(&[alice, bob], &groups, "timezone");

        let text = render_report(&groups, &summary, &ReportOptions::default());
        assert!(text.starts_with("Total Groups: 2\n"));
        assert!(text.contains("\tGroups with 0 members: 1\n"));
        assert!(text.contains("\tGroups with 1 members: 1\n"));
        assert!(text.contains("Total Users to Group: 2\n"));
        assert!(text.contains("Total Grouped Users: 1\n"));
        assert!(text.contains("Unique Timezone Groups: 1\n"));
        assert!(text.contains("\nGroup 1\n\tTarget Size: 20\n\tCurrent Size: 1\n\tTimezone: Europe/Paris\n"));
        assert!(text.contains("\t\tUser 1: \t\talice@example.com, Europe/Paris, novice\n"));
        assert!(text.contains("\nGroup 2\n\tTarget Size: 40\n\tCurrent Size: 0\n\tTimezone: \n"));
    }

    struct RejectingWriter;

    impl fmt::Write for RejectingWriter {
        fn write_str(&mut self, _s: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn write_errors_propagate_out_of_the_report() {
        let groups = vec![Group::with_target_size(3)];
        let summary = compute_summary(&[], &groups, "timezone");
        let options = ReportOptions::default();
        let report = Report::new(&groups, &summary, &options);

        use std::fmt::Write as _;
        assert!(write!(RejectingWriter, "{report}").is_err());
        assert_eq!(report.to_string(), render_report(&groups, &summary, &options));
    }

    #[test]
    fn title_case_labels() {
        assert_eq!(title_case("timezone"), "Timezone");
        assert_eq!(title_case("home_region"), "Home Region");
    }

    #[test]
    fn write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.txt");
        let groups = vec![Group::with_target_size(3)];
        let summary = compute_summary(&[], &groups, "timezone");
        write_report(&path, &groups, &summary, &ReportOptions::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Total Groups: 1"));
    }
}
