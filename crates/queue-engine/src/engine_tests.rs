//! Tests for the queue engine operations.

use super::*;
use crate::error::ValidationError;
use std::collections::HashSet;
use tokio::time::sleep;

fn test_config() -> EngineConfig {
    EngineConfig {
        scheduler_worker_threads: 2,
        ..EngineConfig::default()
    }
}

fn engine() -> QueueEngine {
    QueueEngine::new(test_config()).unwrap()
}

fn handle_of(message: &Message) -> String {
    message
        .receipt_handle
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default()
}

// ============================================================================
// Push Tests
// ============================================================================

mod push {
    use super::*;

    /// Verify push returns the MD5 checksum of the body.
    #[tokio::test]
    async fn test_push_returns_body_checksum() {
        let engine = engine();

        let checksum = engine
            .push(PushRequest::new("localhost", "hello"))
            .await
            .unwrap();

        assert_eq!(checksum.as_str(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(engine.queue_depth("localhost").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_rejects_empty_queue_url() {
        let engine = engine();
        let result = engine.push(PushRequest::new("", "hello")).await;
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_push_rejects_empty_body() {
        let engine = engine();
        let result = engine.push(PushRequest::new("localhost", "")).await;
        assert!(matches!(
            result,
            Err(QueueError::InvalidArgument(ValidationError::Required { ref field })) if field == "body"
        ));
        assert!(engine.queue_urls().is_empty());
    }

    /// Verify bodies above the configured limit are rejected.
    #[tokio::test]
    async fn test_push_rejects_oversized_body() {
        let engine = QueueEngine::new(EngineConfig {
            max_message_size_bytes: 4,
            ..test_config()
        })
        .unwrap();

        assert!(engine.push(PushRequest::new("q", "1234")).await.is_ok());
        let result = engine.push(PushRequest::new("q", "12345")).await;
        assert!(matches!(
            result,
            Err(QueueError::InvalidArgument(ValidationError::OutOfRange { .. }))
        ));
    }

    /// Verify a delayed message is invisible until the delay elapses.
    #[tokio::test]
    async fn test_delayed_push_becomes_visible_later() {
        let engine = engine();

        engine
            .push(PushRequest::new("delayed", "later").with_delay_seconds(1))
            .await
            .unwrap();

        let early = engine.pull(PullRequest::new("delayed")).await.unwrap();
        assert!(early.is_empty());

        sleep(Duration::from_millis(1300)).await;

        let late = engine.pull(PullRequest::new("delayed")).await.unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].body_str(), Some("later"));
    }

    /// Verify an explicit zero delay behaves like no delay.
    #[tokio::test]
    async fn test_zero_delay_is_immediate() {
        let engine = engine();

        engine
            .push(PushRequest::new("localhost", "now").with_delay_seconds(0))
            .await
            .unwrap();

        assert_eq!(engine.queue_depth("localhost").await.unwrap(), 1);
        assert_eq!(engine.scheduler_stats().scheduled, 0);
    }
}

// ============================================================================
// Pull Tests
// ============================================================================

mod pull {
    use super::*;

    /// Verify a pushed body comes back unchanged with a handle and checksum.
    #[tokio::test]
    async fn test_pull_returns_pushed_message() {
        let engine = engine();
        let checksum = engine
            .push(PushRequest::new("localhost", "hello"))
            .await
            .unwrap();

        let messages = engine
            .pull(PullRequest::new("localhost").with_max_messages(1))
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body_str(), Some("hello"));
        assert_eq!(messages[0].checksum, checksum);
        assert_eq!(messages[0].receive_count, 1);
        assert!(messages[0].receipt_handle.is_some());
        assert_eq!(engine.in_flight_count("localhost").unwrap(), 1);
    }

    /// Verify the default is a single message.
    #[tokio::test]
    async fn test_pull_defaults_to_one_message() {
        let engine = engine();
        for body in ["a", "b"] {
            engine.push(PushRequest::new("q", body)).await.unwrap();
        }

        let messages = engine.pull(PullRequest::new("q")).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body_str(), Some("a"));
    }

    /// Verify the result is min(max, available).
    #[tokio::test]
    async fn test_pull_returns_min_of_max_and_available() {
        let engine = engine();
        for body in ["a", "b", "c"] {
            engine.push(PushRequest::new("q", body)).await.unwrap();
        }

        let two = engine
            .pull(PullRequest::new("q").with_max_messages(2))
            .await
            .unwrap();
        let rest = engine
            .pull(PullRequest::new("q").with_max_messages(10))
            .await
            .unwrap();

        assert_eq!(two.len(), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].body_str(), Some("c"));
    }

    #[tokio::test]
    async fn test_pull_from_empty_queue_returns_nothing() {
        let engine = engine();
        let messages = engine.pull(PullRequest::new("nothing")).await.unwrap();
        assert!(messages.is_empty());
    }

    /// Verify max above the ceiling fails before any message is touched.
    #[tokio::test]
    async fn test_pull_above_ceiling_is_rejected() {
        let engine = engine();
        engine.push(PushRequest::new("q", "a")).await.unwrap();

        let result = engine
            .pull(PullRequest::new("q").with_max_messages(9999))
            .await;

        assert!(matches!(
            result,
            Err(QueueError::InvalidArgument(ValidationError::OutOfRange { .. }))
        ));
        assert_eq!(engine.queue_depth("q").await.unwrap(), 1);
        assert_eq!(engine.in_flight_count("q").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pull_zero_max_is_rejected() {
        let engine = engine();
        let result = engine.pull(PullRequest::new("q").with_max_messages(0)).await;
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_pull_rejects_empty_queue_url() {
        let engine = engine();
        let result = engine.pull(PullRequest::new("")).await;
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    /// Verify every delivery gets a distinct handle.
    #[tokio::test]
    async fn test_each_delivery_has_unique_handle() {
        let engine = engine();
        for _ in 0..5 {
            engine.push(PushRequest::new("q", "same")).await.unwrap();
        }

        let messages = engine
            .pull(PullRequest::new("q").with_max_messages(5))
            .await
            .unwrap();

        let handles: HashSet<_> = messages.iter().map(handle_of).collect();
        assert_eq!(handles.len(), 5);
    }

    /// Verify pulls after shutdown fail without losing the message.
    #[tokio::test]
    async fn test_pull_after_shutdown_restores_message() {
        let engine = engine();
        engine.push(PushRequest::new("q", "kept")).await.unwrap();
        engine.shutdown();

        let result = engine.pull(PullRequest::new("q")).await;

        assert!(matches!(result, Err(QueueError::SchedulerUnavailable { .. })));
        assert_eq!(engine.queue_depth("q").await.unwrap(), 1);
        assert_eq!(engine.in_flight_count("q").unwrap(), 0);
    }

    /// Verify a message restored by a failed pull was never counted as
    /// received and its unarmed timer was never counted as cancelled.
    #[tokio::test]
    async fn test_restored_message_keeps_receive_count() {
        let engine = engine();
        engine.push(PushRequest::new("q", "kept")).await.unwrap();
        engine.shutdown();

        assert!(engine.pull(PullRequest::new("q")).await.is_err());

        let store = engine.registry.get(&QueueUrl::new("q").unwrap()).unwrap();
        let restored = store.dequeue_front().await.unwrap().unwrap();
        assert_eq!(restored.receive_count, 0);
        assert_eq!(engine.scheduler_stats(), SchedulerStats::default());
    }
}

// ============================================================================
// Delete Tests
// ============================================================================

mod delete {
    use super::*;

    /// Verify push, pull, delete leaves the queue empty.
    #[tokio::test]
    async fn test_delete_removes_message_permanently() {
        let engine = engine();
        engine
            .push(PushRequest::new("localhost", "hello"))
            .await
            .unwrap();
        let messages = engine
            .pull(PullRequest::new("localhost").with_max_messages(1))
            .await
            .unwrap();

        engine
            .delete(DeleteRequest::new("localhost", handle_of(&messages[0])))
            .await
            .unwrap();

        let after = engine
            .pull(PullRequest::new("localhost").with_max_messages(1))
            .await
            .unwrap();
        assert!(after.is_empty());
        assert_eq!(engine.in_flight_count("localhost").unwrap(), 0);
        assert_eq!(engine.scheduler_stats().cancelled, 1);
    }

    /// Verify deleting the same handle twice fails the second time.
    #[tokio::test]
    async fn test_double_delete_is_not_found() {
        let engine = engine();
        engine.push(PushRequest::new("q", "x")).await.unwrap();
        let messages = engine.pull(PullRequest::new("q")).await.unwrap();
        let handle = handle_of(&messages[0]);

        engine
            .delete(DeleteRequest::new("q", handle.clone()))
            .await
            .unwrap();
        let second = engine.delete(DeleteRequest::new("q", handle)).await;

        assert!(matches!(second, Err(QueueError::MessageNotFound { .. })));
    }

    /// Verify a well-formed handle that was never issued is not found.
    #[tokio::test]
    async fn test_unknown_handle_is_not_found() {
        let engine = engine();
        let result = engine
            .delete(DeleteRequest::new(
                "q",
                ReceiptHandle::generate().to_string(),
            ))
            .await;
        assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
    }

    #[tokio::test]
    async fn test_malformed_handle_is_invalid() {
        let engine = engine();
        let empty = engine.delete(DeleteRequest::new("q", "")).await;
        let garbage = engine.delete(DeleteRequest::new("q", "garbage")).await;

        assert!(matches!(empty, Err(QueueError::InvalidArgument(_))));
        assert!(matches!(garbage, Err(QueueError::InvalidArgument(_))));
    }

    /// Verify a handle cannot delete through a different queue.
    #[tokio::test]
    async fn test_delete_on_wrong_queue_is_not_found() {
        let engine = engine();
        engine.push(PushRequest::new("orders", "x")).await.unwrap();
        let messages = engine.pull(PullRequest::new("orders")).await.unwrap();
        let handle = handle_of(&messages[0]);

        let wrong = engine
            .delete(DeleteRequest::new("invoices", handle.clone()))
            .await;
        assert!(matches!(wrong, Err(QueueError::MessageNotFound { .. })));

        engine
            .delete(DeleteRequest::new("orders", handle))
            .await
            .unwrap();
    }
}

// ============================================================================
// Visibility Timeout Tests
// ============================================================================

mod visibility {
    use super::*;

    /// Verify an undeleted message reappears after the timeout, not before.
    #[tokio::test]
    async fn test_message_reappears_after_timeout() {
        let engine = engine();
        engine.push(PushRequest::new("q", "retry")).await.unwrap();

        let first = engine
            .pull(PullRequest::new("q").with_visibility_timeout(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        sleep(Duration::from_millis(300)).await;
        assert!(engine.pull(PullRequest::new("q")).await.unwrap().is_empty());

        sleep(Duration::from_millis(1000)).await;
        let second = engine.pull(PullRequest::new("q")).await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    /// Verify the handle of a superseded delivery can no longer delete.
    #[tokio::test]
    async fn test_stale_handle_is_not_found() {
        let engine = engine();
        engine.push(PushRequest::new("q", "x")).await.unwrap();
        let first = engine
            .pull(PullRequest::new("q").with_visibility_timeout(1))
            .await
            .unwrap();

        sleep(Duration::from_millis(1300)).await;
        let second = engine.pull(PullRequest::new("q")).await.unwrap();
        assert_eq!(second.len(), 1);

        let stale = engine
            .delete(DeleteRequest::new("q", handle_of(&first[0])))
            .await;
        assert!(matches!(stale, Err(QueueError::MessageNotFound { .. })));

        engine
            .delete(DeleteRequest::new("q", handle_of(&second[0])))
            .await
            .unwrap();
    }

    /// Verify three undeleted messages all come back.
    #[tokio::test]
    async fn test_all_undeleted_messages_reappear() {
        let engine = engine();
        for _ in 0..3 {
            engine.push(PushRequest::new("Q", "same")).await.unwrap();
        }

        let first = engine
            .pull(
                PullRequest::new("Q")
                    .with_max_messages(3)
                    .with_visibility_timeout(1),
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        sleep(Duration::from_millis(1500)).await;

        let second = engine
            .pull(PullRequest::new("Q").with_max_messages(3))
            .await
            .unwrap();
        assert_eq!(second.len(), 3);

        let first_ids: HashSet<_> = first.iter().map(|m| m.id.clone()).collect();
        let second_ids: HashSet<_> = second.iter().map(|m| m.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    /// Verify a deleted message does not come back after the timeout.
    #[tokio::test]
    async fn test_deleted_message_never_reappears() {
        let engine = engine();
        engine.push(PushRequest::new("q", "done")).await.unwrap();
        let messages = engine
            .pull(PullRequest::new("q").with_visibility_timeout(1))
            .await
            .unwrap();

        engine
            .delete(DeleteRequest::new("q", handle_of(&messages[0])))
            .await
            .unwrap();

        sleep(Duration::from_millis(1300)).await;
        assert!(engine.pull(PullRequest::new("q")).await.unwrap().is_empty());
        assert_eq!(engine.queue_depth("q").await.unwrap(), 0);
    }

    /// Verify a requeued message goes ahead of later arrivals.
    #[tokio::test]
    async fn test_requeued_message_returns_to_head() {
        let engine = engine();
        engine.push(PushRequest::new("q", "old")).await.unwrap();
        engine
            .pull(PullRequest::new("q").with_visibility_timeout(1))
            .await
            .unwrap();
        engine.push(PushRequest::new("q", "new")).await.unwrap();

        sleep(Duration::from_millis(1300)).await;

        let next = engine.pull(PullRequest::new("q")).await.unwrap();
        assert_eq!(next[0].body_str(), Some("old"));
    }

    /// Verify a zero timeout makes the message visible again right away.
    #[tokio::test]
    async fn test_zero_timeout_requeues_immediately() {
        let engine = engine();
        engine.push(PushRequest::new("q", "bounce")).await.unwrap();

        engine
            .pull(PullRequest::new("q").with_visibility_timeout(0))
            .await
            .unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.queue_depth("q").await.unwrap(), 1);
        assert_eq!(engine.in_flight_count("q").unwrap(), 0);
    }

    /// Verify a per-queue override applies when the pull names no timeout.
    #[tokio::test]
    async fn test_queue_override_timeout_applies() {
        let mut config = test_config();
        config.queues.insert(
            "fast".to_string(),
            crate::config::QueueSettings {
                visibility_timeout_seconds: Some(1),
            },
        );
        let engine = QueueEngine::new(config).unwrap();

        engine.push(PushRequest::new("fast", "x")).await.unwrap();
        engine.push(PushRequest::new("slow", "y")).await.unwrap();
        engine.pull(PullRequest::new("fast")).await.unwrap();
        engine.pull(PullRequest::new("slow")).await.unwrap();

        sleep(Duration::from_millis(1300)).await;

        assert_eq!(engine.queue_depth("fast").await.unwrap(), 1);
        assert_eq!(engine.queue_depth("slow").await.unwrap(), 0);
        assert_eq!(engine.in_flight_count("slow").unwrap(), 1);
    }
}

// ============================================================================
// Introspection Tests
// ============================================================================

mod introspection {
    use super::*;

    #[tokio::test]
    async fn test_queue_urls_lists_referenced_queues() {
        let engine = engine();
        engine.push(PushRequest::new("b", "x")).await.unwrap();
        engine.pull(PullRequest::new("a")).await.unwrap();

        let urls: Vec<_> = engine
            .queue_urls()
            .iter()
            .map(|u| u.as_str().to_string())
            .collect();
        assert_eq!(urls, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_depth_of_unknown_queue_is_zero() {
        let engine = engine();
        assert_eq!(engine.queue_depth("never").await.unwrap(), 0);
        assert!(engine.queue_urls().is_empty());
    }

    /// Verify invalid configuration is refused at construction.
    #[test]
    fn test_invalid_config_is_rejected() {
        let result = QueueEngine::new(EngineConfig {
            max_messages_per_pull: 0,
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }
}
