use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::User;

/// Property key holding a group's intended member count.
pub const TARGET_SIZE: &str = "target_size";

/// An ordered, mutable collection of users plus a property map.
///
/// Attributes like "timezone" are never stored on the group. They are
/// derived on demand from the current members by majority vote, so they
/// follow the membership as strategies add users or fold the group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Group {
    properties: BTreeMap<String, String>,
    members: Vec<User>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: BTreeMap<String, String>) -> Self {
        Self {
            properties,
            members: Vec::new(),
        }
    }

    pub fn with_target_size(size: usize) -> Self {
        let mut group = Self::new();
        group.set_property(TARGET_SIZE, size.to_string());
        group
    }

    /// Append a member. Size limits are the matching strategy's concern.
    pub fn add_user(&mut self, user: User) {
        self.members.push(user);
    }

    /// Drop every member. Properties survive.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn members(&self) -> &[User] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|u| u.id == user_id)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Parsed `target_size` property; absent or unparsable reads as 0.
    pub fn target_size(&self) -> usize {
        self.property(TARGET_SIZE)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn has_capacity(&self) -> bool {
        self.len() < self.target_size()
    }

    /// Majority value of `name` among current members.
    ///
    /// Ties go to the value whose first holder appears earliest in member
    /// order. An empty group yields "".
    pub fn derived(&self, name: &str) -> &str {
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for member in &self.members {
            let value = member.attr(name);
            match tally.iter_mut().find(|(v, _)| *v == value) {
                Some(entry) => entry.1 += 1,
                None => tally.push((value, 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for (value, count) in tally {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((value, count));
            }
        }
        best.map(|(value, _)| value).unwrap_or("")
    }

    pub fn timezone(&self) -> &str {
        self.derived("timezone")
    }

    pub fn expertise(&self) -> &str {
        self.derived("expertise")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, tz: &str) -> User {
        User::new(id).with_attr("timezone", tz)
    }

    #[test]
    fn empty_group_derives_empty_string() {
        let group = Group::new();
        assert_eq!(group.timezone(), "");
        assert_eq!(group.derived("anything"), "");
    }

    #[test]
    fn unanimous_group_derives_shared_value() {
        let mut group = Group::new();
        group.add_user(user("u1", "Europe/Paris"));
        group.add_user(user("u2", "Europe/Paris"));
        assert_eq!(group.timezone(), "Europe/Paris");
    }

    #[test]
    fn majority_wins() {
        let mut group = Group::new();
        group.add_user(user("u1", "Asia/Tokyo"));
        group.add_user(user("u2", "Europe/Paris"));
        group.add_user(user("u3", "Europe/Paris"));
        assert_eq!(group.timezone(), "Europe/Paris");
    }

    #[test]
    fn tie_goes_to_first_value_in_member_order() {
        let mut group = Group::new();
        group.add_user(user("u1", "Asia/Tokyo"));
        group.add_user(user("u2", "Europe/Paris"));
        group.add_user(user("u3", "Europe/Paris"));
        group.add_user(user("u4", "Asia/Tokyo"));
        assert_eq!(group.timezone(), "Asia/Tokyo");
    }

    #[test]
    fn missing_attribute_counts_as_empty_value() {
        let mut group = Group::new();
        group.add_user(User::new("u1"));
        group.add_user(User::new("u2"));
        group.add_user(user("u3", "Asia/Tokyo"));
        assert_eq!(group.timezone(), "");
    }

    #[test]
    fn clear_keeps_properties() {
        let mut group = Group::with_target_size(10);
        group.add_user(user("u1", "A"));
        group.clear();
        assert!(group.is_empty());
        assert_eq!(group.target_size(), 10);
    }

    #[test]
    fn target_size_defaults_to_zero() {
        let mut group = Group::new();
        assert_eq!(group.target_size(), 0);
        assert!(!group.has_capacity());
        group.set_property(TARGET_SIZE, "not a number");
        assert_eq!(group.target_size(), 0);
        group.set_property(TARGET_SIZE, "3");
        assert!(group.has_capacity());
    }
}
