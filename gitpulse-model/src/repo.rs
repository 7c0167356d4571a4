use crate::error::{ModelError, Result};
use std::fmt::{self, Display};
use std::str::FromStr;

/// A validated `<owner>/<name>` repository identifier.
///
/// Exactly one `/` separator with non-empty segments on both sides;
/// everything else is rejected at the boundary so the rest of the system
/// never has to re-check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        if owner.is_empty() || name.is_empty() || owner.contains('/') || name.contains('/') {
            return Err(ModelError::InvalidRepository(format!("{owner}/{name}")));
        }
        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical `owner/name` form used as the repository key in
    /// storage and lock keys.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self {
                    owner: owner.to_owned(),
                    name: name.to_owned(),
                })
            }
            _ => Err(ModelError::InvalidRepository(s.to_owned())),
        }
    }
}

impl Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_two_nonempty_segments() {
        let repo: RepoName = "octocat/hello-world".parse().unwrap();
        assert_eq!(repo.owner(), "octocat");
        assert_eq!(repo.name(), "hello-world");
        assert_eq!(repo.full_name(), "octocat/hello-world");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for bad in ["", "octocat", "/hello", "octocat/", "a/b/c", "/"] {
            assert!(
                bad.parse::<RepoName>().is_err(),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
