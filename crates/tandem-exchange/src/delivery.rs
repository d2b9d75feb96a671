use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tandem_types::events::SelfieEvent;
use tandem_types::models::SelfieResponse;

use crate::ports::{MediaIndex, MessageSink, Notifier};
use crate::reveal::RevealEvent;

/// Consumes [`RevealEvent`]s: posts each photo into the other participant's
/// message stream and tells them about it. A participant never gets their
/// own photo back.
pub struct RevealDelivery {
    messages: Arc<dyn MessageSink>,
    index: Arc<dyn MediaIndex>,
    notifier: Arc<dyn Notifier>,
}

impl RevealDelivery {
    pub fn new(
        messages: Arc<dyn MessageSink>,
        index: Arc<dyn MediaIndex>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            messages,
            index,
            notifier,
        }
    }

    pub async fn run(self, mut reveals: mpsc::UnboundedReceiver<RevealEvent>) {
        while let Some(event) = reveals.recv().await {
            if let Err(e) = self.deliver(&event).await {
                error!("Reveal delivery for exchange {} failed: {}", event.exchange_id, e);
            }
        }
        info!("Reveal queue closed, delivery loop exiting");
    }

    /// Both hand-overs are attempted even when one fails; the exchange is
    /// already COMPLETED for both participants.
    pub async fn deliver(&self, event: &RevealEvent) -> Result<()> {
        let mut failed = Vec::new();
        for (from, to) in [
            (&event.requester, &event.receiver),
            (&event.receiver, &event.requester),
        ] {
            if let Err(e) = self.hand_over(event, from, to).await {
                error!(
                    "Posting {}'s photo to {} for exchange {} failed: {}",
                    from.user_id, to.user_id, event.exchange_id, e
                );
                failed.push(to.user_id);
            }
        }

        if !failed.is_empty() {
            bail!("photo not delivered to {:?}", failed);
        }
        Ok(())
    }

    async fn hand_over(
        &self,
        event: &RevealEvent,
        from: &SelfieResponse,
        to: &SelfieResponse,
    ) -> Result<()> {
        // Once posted as a chat attachment the photo is shared content.
        if let Err(e) = self
            .index
            .record_if_absent(&from.content_hash, &from.object_key)
            .await
        {
            warn!("Could not index revealed photo {}: {}", from.object_key, e);
        }

        let message = self
            .messages
            .post_image(from.user_id, to.user_id, &from.object_key)
            .await?;

        if let Err(e) = self.notifier.deliver_message(to.user_id, message.clone()).await {
            warn!("Message push to {} failed: {}", to.user_id, e);
        }

        let completed = SelfieEvent::Completed {
            exchange_id: event.exchange_id,
            other_photo_ref: from.object_key.clone(),
            message_id: message.id,
        };
        if let Err(e) = self.notifier.send_to_user(to.user_id, completed).await {
            warn!("Completion notice to {} failed: {}", to.user_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeMediaIndex, FakeMessageSink, FakeNotifier};
    use chrono::Utc;
    use uuid::Uuid;

    fn response(user_id: Uuid, key: &str) -> SelfieResponse {
        SelfieResponse {
            exchange_id: Uuid::nil(),
            user_id,
            object_key: key.to_string(),
            content_hash: format!("hash-of-{}", key),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn photos_cross_over() {
        let sink = FakeMessageSink::new();
        let index = FakeMediaIndex::new();
        let notifier = FakeNotifier::new();
        let delivery = RevealDelivery::new(
            Arc::new(sink.clone()),
            Arc::new(index.clone()),
            Arc::new(notifier.clone()),
        );

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let event = RevealEvent {
            exchange_id: Uuid::new_v4(),
            requester: response(alice, "selfies/alice.jpg"),
            receiver: response(bob, "selfies/bob.jpg"),
            completed_at: Utc::now(),
        };
        delivery.deliver(&event).await.unwrap();

        let to_bob = notifier.events_for(bob).await;
        assert!(matches!(
            to_bob.as_slice(),
            [SelfieEvent::Completed { other_photo_ref, .. }] if other_photo_ref == "selfies/alice.jpg"
        ));
        let to_alice = notifier.events_for(alice).await;
        assert!(matches!(
            to_alice.as_slice(),
            [SelfieEvent::Completed { other_photo_ref, .. }] if other_photo_ref == "selfies/bob.jpg"
        ));

        let bob_inbox = notifier.messages_for(bob).await;
        assert_eq!(bob_inbox.len(), 1);
        assert_eq!(bob_inbox[0].sender_id, alice);
        assert_eq!(sink.messages().await.len(), 2);

        assert!(index.exists("hash-of-selfies/alice.jpg").await.unwrap());
        assert!(index.exists("hash-of-selfies/bob.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn one_failed_post_still_delivers_the_other_photo() {
        let sink = FakeMessageSink::new();
        let notifier = FakeNotifier::new();
        let delivery = RevealDelivery::new(
            Arc::new(sink.clone()),
            Arc::new(FakeMediaIndex::new()),
            Arc::new(notifier.clone()),
        );

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        sink.fake_fail_posts_from(alice).await;
        let event = RevealEvent {
            exchange_id: Uuid::new_v4(),
            requester: response(alice, "selfies/alice.jpg"),
            receiver: response(bob, "selfies/bob.jpg"),
            completed_at: Utc::now(),
        };

        assert!(delivery.deliver(&event).await.is_err());

        let to_alice = notifier.events_for(alice).await;
        assert!(matches!(
            to_alice.as_slice(),
            [SelfieEvent::Completed { other_photo_ref, .. }] if other_photo_ref == "selfies/bob.jpg"
        ));
        assert!(notifier.events_for(bob).await.is_empty());
        assert_eq!(sink.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn notifier_outage_does_not_fail_delivery() {
        let sink = FakeMessageSink::new();
        let notifier = FakeNotifier::new();
        notifier.fake_fail_all().await;
        let delivery = RevealDelivery::new(
            Arc::new(sink.clone()),
            Arc::new(FakeMediaIndex::new()),
            Arc::new(notifier),
        );

        let event = RevealEvent {
            exchange_id: Uuid::new_v4(),
            requester: response(Uuid::new_v4(), "selfies/a.jpg"),
            receiver: response(Uuid::new_v4(), "selfies/b.jpg"),
            completed_at: Utc::now(),
        };
        delivery.deliver(&event).await.unwrap();
        assert_eq!(sink.messages().await.len(), 2);
    }
}
