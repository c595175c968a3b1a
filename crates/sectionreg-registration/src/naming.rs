//! Run tag strategies.

use chrono::{Local, NaiveDateTime};

/// Maps a project name to the tag prefixing a run's output directories.
pub trait NamingStrategy {
    fn run_tag(&self, project_name: &str) -> String;
}

/// `%Y%m%d_%H_%M_%S_<project>` at a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampNaming {
    at: NaiveDateTime,
}

impl TimestampNaming {
    pub fn at(at: NaiveDateTime) -> Self {
        Self { at }
    }

    /// Capture the local clock once.
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }
}

impl NamingStrategy for TimestampNaming {
    fn run_tag(&self, project_name: &str) -> String {
        format!("{}_{}", self.at.format("%Y%m%d_%H_%M_%S"), project_name)
    }
}

/// A tag chosen by the caller, used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerTag(pub String);

impl NamingStrategy for CallerTag {
    fn run_tag(&self, _project_name: &str) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_tag() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 7)
            .and_then(|d| d.and_hms_opt(9, 5, 42))
            .unwrap();
        assert_eq!(TimestampNaming::at(at).run_tag("kidney"), "20240307_09_05_42_kidney");
    }

    #[test]
    fn test_caller_tag_ignores_project() {
        assert_eq!(CallerTag("fixed".into()).run_tag("kidney"), "fixed");
    }
}
