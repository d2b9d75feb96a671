use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds the receiver has to accept a request.
pub const ACCEPT_WINDOW_SECS: i64 = 30;

/// Seconds both participants have to submit after acceptance.
pub const CAPTURE_WINDOW_SECS: i64 = 10;

/// Countdown clients show before opening the camera.
pub const CAPTURE_DELAY_SECS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    Pending,
    Accepted,
    Completed,
    Expired,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Completed and expired exchanges never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    /// Position in the forward-only lifecycle. Both terminal states share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Accepted => 1,
            Self::Completed | Self::Expired => 2,
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown exchange status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ExchangeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "COMPLETED" => Ok(Self::Completed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One selfie-reveal attempt between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub receiver_id: Uuid,
    pub status: ExchangeStatus,
    pub created_at: DateTime<Utc>,
    /// Accept-by deadline.
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Exchange {
    pub fn new(requester_id: Uuid, receiver_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            receiver_id,
            status: ExchangeStatus::Pending,
            created_at: now,
            expires_at: now + Duration::seconds(ACCEPT_WINDOW_SECS),
            accepted_at: None,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.receiver_id == user_id
    }

    /// The participant on the other side of `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if self.requester_id == user_id {
            self.receiver_id
        } else {
            self.requester_id
        }
    }

    /// Submit-by deadline, known only once accepted.
    pub fn capture_deadline(&self) -> Option<DateTime<Utc>> {
        self.accepted_at
            .map(|at| at + Duration::seconds(CAPTURE_WINDOW_SECS))
    }
}

/// One participant's submitted photo for an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfieResponse {
    pub exchange_id: Uuid,
    pub user_id: Uuid,
    pub object_key: String,
    pub content_hash: String,
    pub submitted_at: DateTime<Utc>,
}

/// Chat message produced by a reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub attachment_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An exchange as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeView {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub receiver_id: Uuid,
    pub status: ExchangeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub capture_deadline: Option<DateTime<Utc>>,
    pub my_submitted: bool,
    pub other_submitted: bool,
    /// Object key of the other participant's photo, once revealed.
    pub other_photo_ref: Option<String>,
}

impl ExchangeView {
    pub fn new(exchange: &Exchange, viewer_id: Uuid, responses: &[SelfieResponse]) -> Self {
        let submitted = |user_id: Uuid| responses.iter().any(|r| r.user_id == user_id);
        let other_id = exchange.counterpart(viewer_id);
        let other_photo_ref = match exchange.status {
            ExchangeStatus::Completed => responses
                .iter()
                .find(|r| r.user_id == other_id)
                .map(|r| r.object_key.clone()),
            _ => None,
        };
        Self {
            id: exchange.id,
            requester_id: exchange.requester_id,
            receiver_id: exchange.receiver_id,
            status: exchange.status,
            created_at: exchange.created_at,
            expires_at: exchange.expires_at,
            accepted_at: exchange.accepted_at,
            capture_deadline: exchange.capture_deadline(),
            my_submitted: submitted(viewer_id),
            other_submitted: submitted(other_id),
            other_photo_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_rendering() {
        for status in [
            ExchangeStatus::Pending,
            ExchangeStatus::Accepted,
            ExchangeStatus::Completed,
            ExchangeStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ExchangeStatus>(), Ok(status));
        }
        assert!("CANCELLED".parse::<ExchangeStatus>().is_err());
    }

    #[test]
    fn deadlines_follow_windows() {
        let now = Utc::now();
        let mut exchange = Exchange::new(Uuid::new_v4(), Uuid::new_v4(), now);
        assert_eq!(exchange.expires_at, now + Duration::seconds(30));
        assert_eq!(exchange.capture_deadline(), None);

        exchange.accepted_at = Some(now + Duration::seconds(10));
        assert_eq!(exchange.capture_deadline(), Some(now + Duration::seconds(20)));
    }

    #[test]
    fn view_flags_are_relative_to_viewer() {
        let now = Utc::now();
        let exchange = Exchange::new(Uuid::new_v4(), Uuid::new_v4(), now);
        let responses = vec![SelfieResponse {
            exchange_id: exchange.id,
            user_id: exchange.requester_id,
            object_key: "selfies/a.jpg".into(),
            content_hash: "aa".into(),
            submitted_at: now,
        }];

        let mine = ExchangeView::new(&exchange, exchange.requester_id, &responses);
        assert!(mine.my_submitted);
        assert!(!mine.other_submitted);

        let theirs = ExchangeView::new(&exchange, exchange.receiver_id, &responses);
        assert!(!theirs.my_submitted);
        assert!(theirs.other_submitted);
        assert_eq!(theirs.other_photo_ref, None);
    }

    #[test]
    fn completed_view_points_at_the_other_photo() {
        let now = Utc::now();
        let mut exchange = Exchange::new(Uuid::new_v4(), Uuid::new_v4(), now);
        exchange.status = ExchangeStatus::Completed;
        let response = |user_id, key: &str| SelfieResponse {
            exchange_id: exchange.id,
            user_id,
            object_key: key.into(),
            content_hash: key.into(),
            submitted_at: now,
        };
        let responses = vec![
            response(exchange.requester_id, "selfies/a.jpg"),
            response(exchange.receiver_id, "selfies/b.jpg"),
        ];

        let requester = ExchangeView::new(&exchange, exchange.requester_id, &responses);
        assert_eq!(requester.other_photo_ref.as_deref(), Some("selfies/b.jpg"));
        let receiver = ExchangeView::new(&exchange, exchange.receiver_id, &responses);
        assert_eq!(receiver.other_photo_ref.as_deref(), Some("selfies/a.jpg"));
    }
}
