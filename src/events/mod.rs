/// Account lifecycle events and the transactional outbox contract
///
/// State-changing operations stage an `OutboxEvent` through the same
/// transaction as the rows they write. A separate worker, outside this crate,
/// delivers staged rows.
use crate::{db::account::Role, error::IdentityResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Schema version stamped on every envelope
pub const EVENT_VERSION: i32 = 1;

/// Event type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "account.created")]
    Created,
    #[serde(rename = "account.created.by_admin")]
    CreatedByAdmin,
    #[serde(rename = "account.login")]
    Login,
    #[serde(rename = "account.password.change")]
    PasswordChanged,
    #[serde(rename = "account.username.change")]
    UsernameChanged,
    #[serde(rename = "account.deleted")]
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "account.created",
            EventType::CreatedByAdmin => "account.created.by_admin",
            EventType::Login => "account.login",
            EventType::PasswordChanged => "account.password.change",
            EventType::UsernameChanged => "account.username.change",
            EventType::Deleted => "account.deleted",
        }
    }
}

/// Domain event emitted by the identity core
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    Created {
        account_id: Uuid,
        username: String,
        role: Role,
        email: String,
    },
    CreatedByAdmin {
        account_id: Uuid,
        username: String,
        role: Role,
        email: String,
        admin_id: Uuid,
    },
    Login {
        account_id: Uuid,
        session_id: Uuid,
    },
    PasswordChanged {
        account_id: Uuid,
    },
    UsernameChanged {
        account_id: Uuid,
        username: String,
        previous_username: String,
    },
    Deleted {
        account_id: Uuid,
    },
}

impl AccountEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            AccountEvent::Created { .. } => EventType::Created,
            AccountEvent::CreatedByAdmin { .. } => EventType::CreatedByAdmin,
            AccountEvent::Login { .. } => EventType::Login,
            AccountEvent::PasswordChanged { .. } => EventType::PasswordChanged,
            AccountEvent::UsernameChanged { .. } => EventType::UsernameChanged,
            AccountEvent::Deleted { .. } => EventType::Deleted,
        }
    }

    /// Account the event is about; used as the partition key
    pub fn account_id(&self) -> Uuid {
        match self {
            AccountEvent::Created { account_id, .. }
            | AccountEvent::CreatedByAdmin { account_id, .. }
            | AccountEvent::Login { account_id, .. }
            | AccountEvent::PasswordChanged { account_id }
            | AccountEvent::UsernameChanged { account_id, .. }
            | AccountEvent::Deleted { account_id } => *account_id,
        }
    }

    fn payload(&self) -> serde_json::Value {
        match self {
            AccountEvent::Created {
                account_id,
                username,
                role,
                email,
            } => json!({
                "accountId": account_id,
                "username": username,
                "role": role,
                "email": email,
            }),
            AccountEvent::CreatedByAdmin {
                account_id,
                username,
                role,
                email,
                admin_id,
            } => json!({
                "accountId": account_id,
                "username": username,
                "role": role,
                "email": email,
                "adminId": admin_id,
            }),
            AccountEvent::Login {
                account_id,
                session_id,
            } => json!({
                "accountId": account_id,
                "sessionId": session_id,
            }),
            AccountEvent::PasswordChanged { account_id } => json!({
                "accountId": account_id,
            }),
            AccountEvent::UsernameChanged {
                account_id,
                username,
                previous_username,
            } => json!({
                "accountId": account_id,
                "username": username,
                "previousUsername": previous_username,
            }),
            AccountEvent::Deleted { account_id } => json!({
                "accountId": account_id,
            }),
        }
    }
}

/// Envelope staged in the outbox table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub event_type: EventType,
    pub version: i32,
    pub producer: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Capability to stage an event inside an open transaction
#[async_trait]
pub trait OutboxSink: Send {
    async fn emit(&mut self, event: &OutboxEvent) -> IdentityResult<()>;
}

/// Builds outbox envelopes for one topic on behalf of one producer
#[derive(Debug, Clone)]
pub struct EventProducer {
    topic: String,
    producer: String,
}

impl EventProducer {
    pub fn new(topic: impl Into<String>, producer: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            producer: producer.into(),
        }
    }

    pub fn envelope(&self, event: &AccountEvent, at: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id: Uuid::new_v4(),
            topic: self.topic.clone(),
            key: event.account_id().to_string(),
            event_type: event.event_type(),
            version: EVENT_VERSION,
            producer: self.producer.clone(),
            payload: event.payload(),
            created_at: at,
        }
    }
}
