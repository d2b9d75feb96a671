use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, ExchangeView};

/// State-change notifications for the two participants of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelfieEvent {
    /// Sent to the receiver when someone asks for a selfie exchange
    RequestCreated {
        exchange_id: Uuid,
        requester_id: Uuid,
        expires_at: DateTime<Utc>,
    },

    /// Both sides start the countdown; photos must arrive before `deadline`
    Start {
        exchange_id: Uuid,
        capture_delay_seconds: u32,
        deadline: DateTime<Utc>,
    },

    /// The other participant's photo, revealed
    Completed {
        exchange_id: Uuid,
        other_photo_ref: String,
        message_id: Uuid,
    },

    Expired { exchange_id: Uuid },

    Cancelled { exchange_id: Uuid, cancelled_by: Uuid },
}

impl SelfieEvent {
    pub fn exchange_id(&self) -> Uuid {
        match self {
            Self::RequestCreated { exchange_id, .. }
            | Self::Start { exchange_id, .. }
            | Self::Completed { exchange_id, .. }
            | Self::Expired { exchange_id }
            | Self::Cancelled { exchange_id, .. } => *exchange_id,
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid },

    /// Selfie exchange state change
    Selfie(SelfieEvent),

    /// Current state of an exchange, answering a command from this client
    ExchangeState(ExchangeView),

    /// A chat message landed in this user's stream
    MessageCreate(ChatMessage),

    /// A command from this client could not be applied
    CommandRejected { reason: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    RequestSelfie { receiver_id: Uuid },

    AcceptSelfie { exchange_id: Uuid },

    SubmitSelfie {
        exchange_id: Uuid,
        object_key: String,
        #[serde(default)]
        content_hash: String,
    },

    CancelSelfie { exchange_id: Uuid },
}
