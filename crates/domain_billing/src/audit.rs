//! Audit and soft-delete markers shared by billing records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::UserId;

/// Who created and last touched a record, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<UserId>,
}

impl AuditInfo {
    /// Audit fields for a record created now
    pub fn created(by: Option<UserId>) -> Self {
        Self::created_at(Utc::now(), by)
    }

    /// Audit fields for a record created at a given instant
    pub fn created_at(at: DateTime<Utc>, by: Option<UserId>) -> Self {
        Self {
            created_at: at,
            created_by: by,
            updated_at: None,
            updated_by: None,
        }
    }

    /// Records an update
    pub fn touch(&mut self, by: Option<UserId>) {
        self.updated_at = Some(Utc::now());
        self.updated_by = by;
    }

    /// Most recent modification, falling back to creation time
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Soft-delete marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: UserId,
}
