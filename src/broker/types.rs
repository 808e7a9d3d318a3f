use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::NewBankEntity;

/// Lifecycle of an asynchronously submitted creation request.
///
/// Pending is set on acceptance, Processing by the consumer on dequeue.
/// Completed, Failed and Duplicate are terminal; no transition ever leaves
/// a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Duplicate,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Duplicate
        )
    }
}

/// Broker envelope for creation requests and results, also the record shape
/// held by the message tracker.
///
/// Serialized to JSON on the wire. The partition key is the idempotency key,
/// so all messages for one key land in the same ordered partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMessage {
    /// System-generated, unique (UUID v4)
    pub message_id: String,

    /// Caller-supplied idempotency key, also the partition key
    pub idempotency_key: String,

    // ===== Payload snapshot =====
    pub name: String,
    pub code: String,
    pub country: String,

    pub created_at: DateTime<Utc>,

    pub status: MessageStatus,

    /// Set when the message settles as Failed or Duplicate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Id of the created entity; set when the message settles as Completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
}

impl EntityMessage {
    pub fn new(idempotency_key: &str, payload: &NewBankEntity) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            idempotency_key: idempotency_key.to_string(),
            name: payload.name.clone(),
            code: payload.code.clone(),
            country: payload.country.clone(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
            error_message: None,
            entity_id: None,
        }
    }

    pub fn payload(&self) -> NewBankEntity {
        NewBankEntity {
            name: self.name.clone(),
            code: self.code.clone(),
            country: self.country.clone(),
        }
    }

    /// Validate envelope structure before publishing or processing.
    pub fn validate(&self) -> Result<()> {
        if self.message_id.is_empty() {
            anyhow::bail!("messageId is required");
        }
        if self.idempotency_key.is_empty() {
            anyhow::bail!("idempotencyKey is required");
        }
        if self.name.is_empty() {
            anyhow::bail!("name is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> NewBankEntity {
        NewBankEntity {
            name: "Banco Test".to_string(),
            code: "999".to_string(),
            country: "Argentina".to_string(),
        }
    }

    #[test]
    fn test_new_message_starts_pending() {
        let msg = EntityMessage::new("key-1", &payload());
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.entity_id.is_none());
        assert!(msg.error_message.is_none());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Duplicate.is_terminal());
    }

    #[test]
    fn test_envelope_validation() {
        let mut msg = EntityMessage::new("key-1", &payload());
        assert!(msg.validate().is_ok());

        msg.idempotency_key = String::new();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let msg = EntityMessage::new("key-1", &payload());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("messageId").is_some());
        assert!(json.get("idempotencyKey").is_some());
        assert_eq!(json.get("status").unwrap(), "PENDING");
        // Unset optionals are omitted from the wire
        assert!(json.get("errorMessage").is_none());
        assert!(json.get("entityId").is_none());
    }
}
