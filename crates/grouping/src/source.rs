use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::debug;

use crate::error::GroupingError;
use crate::model::User;

/// Criteria for loading the user pool: every criterion must equal the
/// user's attribute, then at most `limit` users are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub criteria: BTreeMap<String, String>,
    pub limit: Option<usize>,
}

impl UserFilter {
    pub fn accepts(&self, user: &User) -> bool {
        self.criteria
            .iter()
            .all(|(name, value)| user.attr(name) == value)
    }
}

/// Supplies the initial user pool.
pub trait UserSource {
    fn load(&self, filter: &UserFilter) -> Result<Vec<User>, GroupingError>;
}

/// Users from a headered CSV. `id_column` is the identity; every other
/// column becomes an attribute.
#[derive(Debug, Clone)]
pub struct CsvUserSource {
    data: String,
    id_column: String,
}

impl CsvUserSource {
    pub fn new(data: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            id_column: id_column.into(),
        }
    }

    pub fn from_path(path: &Path, id_column: impl Into<String>) -> Result<Self, GroupingError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| GroupingError::Io(format!("cannot read {}: {e}", path.display())))?;
        Ok(Self::new(data, id_column))
    }
}

impl UserSource for CsvUserSource {
    fn load(&self, filter: &UserFilter) -> Result<Vec<User>, GroupingError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(self.data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| GroupingError::Io(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let id_idx = headers
            .iter()
            .position(|h| *h == self.id_column)
            .ok_or_else(|| GroupingError::MissingColumn {
                column: self.id_column.clone(),
            })?;

        for name in filter.criteria.keys() {
            if !headers.iter().any(|h| h == name) {
                return Err(GroupingError::MissingColumn {
                    column: name.clone(),
                });
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut users = Vec::new();

        for record in reader.records() {
            if filter.limit.is_some_and(|limit| users.len() >= limit) {
                break;
            }
            let record = record.map_err(|e| GroupingError::Io(e.to_string()))?;
            let id = record.get(id_idx).unwrap_or("").to_string();
            if !seen.insert(id.clone()) {
                return Err(GroupingError::DuplicateUser { id });
            }

            let mut user = User::new(id);
            for (i, header) in headers.iter().enumerate() {
                if i == id_idx {
                    continue;
                }
                if let Some(value) = record.get(i) {
                    user.attributes.insert(header.clone(), value.to_string());
                }
            }

            if !filter.accepts(&user) {
                continue;
            }
            users.push(user);
        }

        debug!("Loaded {} users", users.len());
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
id,email,timezone,expertise,round
1,a@example.com,Europe/Paris,novice,3
2,b@example.com,Asia/Tokyo,expert,3
3,c@example.com,Europe/Berlin,novice,2
4,d@example.com,America/Chicago,expert,3
";

    #[test]
    fn load_all() {
        let users = CsvUserSource::new(CSV, "id")
            .load(&UserFilter::default())
            .unwrap();
        assert_eq!(users.len(), 4);
        assert_eq!(users[1].id, "2");
        assert_eq!(users[1].timezone(), "Asia/Tokyo");
        assert_eq!(users[1].attr("email"), "b@example.com");
        assert!(!users[1].attributes.contains_key("id"));
    }

    #[test]
    fn filter_and_limit() {
        let mut filter = UserFilter::default();
        filter.criteria.insert("round".into(), "3".into());
        filter.limit = Some(2);
        let users = CsvUserSource::new(CSV, "id").load(&filter).unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn limit_zero_loads_nobody() {
        let filter = UserFilter {
            limit: Some(0),
            ..UserFilter::default()
        };
        let users = CsvUserSource::new("id,timezone\n1,A\n2,B\n3,C\n", "id")
            .load(&filter)
            .unwrap();
        assert!(users.is_empty(), "limit 0 returned {:?}", users);
    }

    #[test]
    fn missing_id_column() {
        let err = CsvUserSource::new(CSV, "user_id")
            .load(&UserFilter::default())
            .unwrap_err();
        assert!(err.to_string().contains("'user_id'"));
    }

    #[test]
    fn missing_filter_column() {
        let mut filter = UserFilter::default();
        filter.criteria.insert("cohort".into(), "a".into());
        let err = CsvUserSource::new(CSV, "id").load(&filter).unwrap_err();
        assert!(matches!(err, GroupingError::MissingColumn { ref column } if column == "cohort"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let data = "id,timezone\n1,A\n1,B\n";
        let err = CsvUserSource::new(data, "id")
            .load(&UserFilter::default())
            .unwrap_err();
        assert!(matches!(err, GroupingError::DuplicateUser { ref id } if id == "1"));
    }
}
