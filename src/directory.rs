//! Who may book a room for what.
//!
//! The scheduler asks two questions before it books anything: is this person
//! a professor, and do they teach this subject. Answers come from a
//! [`Directory`]; the engine never stores users itself.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
    Student,
}

pub trait Directory: Send + Sync {
    fn role(&self, teacher: &str) -> Option<Role>;
    fn teaches(&self, teacher: &str, subject: &str) -> bool;
}

/// Accepts everyone as a professor of every subject.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

impl Directory for OpenDirectory {
    fn role(&self, _teacher: &str) -> Option<Role> {
        Some(Role::Professor)
    }

    fn teaches(&self, _teacher: &str, _subject: &str) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    users: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    email: String,
    role: Role,
    #[serde(default)]
    subjects: Vec<String>,
}

/// Fixed user list, keyed by e-mail. Subject names compare exactly.
#[derive(Debug, Default)]
pub struct Roster {
    users: HashMap<String, (Role, HashSet<String>)>,
}

impl Roster {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: RosterFile = serde_json::from_str(json)?;
        let users = file
            .users
            .into_iter()
            .map(|u| (u.email, (u.role, u.subjects.into_iter().collect())))
            .collect();
        Ok(Self { users })
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Directory for Roster {
    fn role(&self, teacher: &str) -> Option<Role> {
        self.users.get(teacher).map(|(role, _)| *role)
    }

    fn teaches(&self, teacher: &str, subject: &str) -> bool {
        self.users
            .get(teacher)
            .is_some_and(|(_, subjects)| subjects.contains(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"{
        "users": [
            {"email": "ana@school.edu", "role": "professor", "subjects": ["Physics", "Algebra"]},
            {"email": "bruno@school.edu", "role": "student"},
            {"email": "carla@school.edu", "role": "admin", "subjects": []}
        ]
    }"#;

    #[test]
    fn roster_roles_and_subjects() {
        let roster = Roster::from_json(ROSTER).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.role("ana@school.edu"), Some(Role::Professor));
        assert_eq!(roster.role("bruno@school.edu"), Some(Role::Student));
        assert_eq!(roster.role("nobody@school.edu"), None);
        assert!(roster.teaches("ana@school.edu", "Physics"));
        assert!(!roster.teaches("ana@school.edu", "physics"));
        assert!(!roster.teaches("carla@school.edu", "Physics"));
        assert!(!roster.teaches("nobody@school.edu", "Physics"));
    }

    #[test]
    fn roster_rejects_unknown_role() {
        let bad = r#"{"users": [{"email": "x@y.z", "role": "janitor"}]}"#;
        assert!(Roster::from_json(bad).is_err());
    }

    #[test]
    fn open_directory_allows_everything() {
        let dir = OpenDirectory;
        assert_eq!(dir.role("anyone"), Some(Role::Professor));
        assert!(dir.teaches("anyone", "anything"));
    }
}
