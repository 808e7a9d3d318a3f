use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// A registered bank entity, the resource this service creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BankEntity {
    pub id: Uuid,
    pub name: String,
    /// Regulator code, 3-10 characters
    pub code: String,
    pub country: String,
}

/// Creation payload as submitted by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBankEntity {
    pub name: String,
    pub code: String,
    pub country: String,
}

impl NewBankEntity {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name is required"));
        }
        if self.code.trim().is_empty() {
            return Err(AppError::validation("code is required"));
        }
        if self.code.len() < 3 || self.code.len() > 10 {
            return Err(AppError::validation("code must be 3-10 characters"));
        }
        if self.country.trim().is_empty() {
            return Err(AppError::validation("country is required"));
        }
        Ok(())
    }

    pub fn into_entity(self, id: Uuid) -> BankEntity {
        BankEntity {
            id,
            name: self.name,
            code: self.code,
            country: self.country,
        }
    }
}

/// Classifies a failed creation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Caller-supplied key is not a well-formed UUID; nothing was touched
    InvalidKey,
    /// The per-key lock could not be acquired within the bounded wait
    LockTimeout,
    /// The creation step itself failed
    Processing,
}

/// Outcome of a single idempotent creation attempt.
///
/// Exactly one `Created` is ever produced per idempotency key, across the
/// synchronous and asynchronous paths combined. Every consumption site
/// matches exhaustively.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreationResult {
    Created { entity: BankEntity },
    Duplicate { reason: String },
    Failed { kind: FailureKind, message: String },
}

impl CreationResult {
    pub fn is_created(&self) -> bool {
        matches!(self, CreationResult::Created { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreationResult::Duplicate { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CreationResult::Failed { .. })
    }
}

/// Parse and validate a caller-supplied idempotency key.
///
/// Keys must be well-formed UUIDs; anything else is rejected before any lock
/// or store is touched.
pub fn parse_idempotency_key(key: &str) -> AppResult<Uuid> {
    Uuid::parse_str(key.trim())
        .map_err(|_| AppError::InvalidKey(format!("'{}' is not a valid UUID", key)))
}
