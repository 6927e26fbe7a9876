//! User aggregate: id, email, per-user settings, security, and checklists.
//!
//! Ported from `original_source/user/user.go`'s `User` struct.

use chrono_tz::Tz;
use preflight_errors::{ErrorKind, PreflightError};
use preflight_security::Security;
use serde::{Deserialize, Serialize};

use crate::checklist::{Checklist, ChecklistId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user preferences outside the scheduling/security core proper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub timezone: String,
    pub kanban_board: String,
}

impl GeneralSettings {
    /// Confirms `timezone` names a real IANA zone; a dependency outside the
    /// core's control being unmet (424), not a caller format error.
    pub fn validate(&self) -> Result<Tz, PreflightError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            PreflightError::simple(
                ErrorKind::UnmetDependency,
                format!("unknown timezone \"{}\"", self.timezone),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub settings: GeneralSettings,
    pub security: Security,
    pub checklists: Vec<Checklist>,
}

impl User {
    /// `checklists` ids and names must each be unique within the user.
    pub fn validate(&self) -> Result<(), PreflightError> {
        self.settings.validate()?;
        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_names = std::collections::HashSet::new();
        for cl in &self.checklists {
            cl.validate()?;
            if !seen_ids.insert(&cl.id) {
                return Err(PreflightError::simple(
                    ErrorKind::Validation,
                    format!("user {}: duplicate checklist id {}", self.id, cl.id),
                ));
            }
            if !seen_names.insert(&cl.name) {
                return Err(PreflightError::simple(
                    ErrorKind::Conflict,
                    format!("user {}: duplicate checklist name {}", self.id, cl.name),
                ));
            }
        }
        Ok(())
    }

    pub fn checklist(&self, id: &ChecklistId) -> Option<&Checklist> {
        self.checklists.iter().find(|cl| &cl.id == id)
    }
}
