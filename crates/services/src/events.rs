use progress_core::events::QuizCompleted;
use tokio::sync::broadcast;

/// Receives domain events after the write that produced them has committed.
pub trait QuizEventSink: Send + Sync {
    fn publish(&self, event: &QuizCompleted);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl QuizEventSink for NoopEvents {
    fn publish(&self, _event: &QuizCompleted) {}
}

/// Fans events out over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events; publishing never blocks and
/// never fails the operation that produced the event.
#[derive(Debug, Clone)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<QuizCompleted>,
}

impl BroadcastEvents {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QuizCompleted> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

impl QuizEventSink for BroadcastEvents {
    fn publish(&self, event: &QuizCompleted) {
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(lesson_id = %event.lesson_id, "no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{CourseId, LessonId, StudentId};
    use progress_core::scoring::QuizOutcome;

    fn event() -> QuizCompleted {
        QuizCompleted::new(
            StudentId::new(1),
            CourseId::new(2),
            LessonId::new(3),
            &QuizOutcome::from_counts(1, 2, 50),
        )
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let events = BroadcastEvents::new(4);
        let mut rx = events.subscribe();
        events.publish(&event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.score, 50);
        assert_eq!(received.wrong_answer_count, 1);
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        BroadcastEvents::default().publish(&event());
        NoopEvents.publish(&event());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest() {
        let events = BroadcastEvents::new(1);
        let mut rx = events.subscribe();
        events.publish(&event());
        events.publish(&event());

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
