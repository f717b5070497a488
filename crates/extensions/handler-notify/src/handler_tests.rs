    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::ledger::Notification;

    /// Channel that fails the first `failures` sends.
    struct FlakyChannel {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, _notification: &Notification) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandlerError::Downstream("webhook returned 502".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn ctx(id: Uuid, data: Value) -> TaskContext {
        TaskContext {
            id,
            tag: TASK_TAG.to_string(),
            data,
            attempt: 1,
        }
    }

    fn data() -> Value {
        json!({
            "notification_type": "slack",
            "recipient": "#ops",
            "subject": "INC-7",
            "message": "Database latency above threshold",
            "metadata": {"incident": 7}
        })
    }

    async fn handler(channel: Arc<dyn NotificationChannel>) -> NotificationHandler {
        let ledger = Arc::new(NotificationLedger::in_memory().await.unwrap());
        NotificationHandler::new(ledger, channel)
    }

    #[test]
    fn test_request_parsing() {
        let request = NotificationRequest::from_data(&data()).unwrap();
        assert_eq!(request.notification_type, NotificationType::Slack);
        assert_eq!(request.subject.as_deref(), Some("INC-7"));

        let aliased = json!({"type": "email", "recipient": "oncall@example.com", "message": "hi"});
        let request = NotificationRequest::from_data(&aliased).unwrap();
        assert_eq!(request.notification_type, NotificationType::Email);
        assert!(request.metadata.is_null());
    }

    #[test]
    fn test_request_double_encoded() {
        let raw = Value::String(data().to_string());
        let request = NotificationRequest::from_data(&raw).unwrap();
        assert_eq!(request.recipient, "#ops");
    }

    #[test]
    fn test_request_invalid() {
        let unknown_type = json!({"notification_type": "pager", "recipient": "x", "message": "y"});
        assert!(matches!(
            NotificationRequest::from_data(&unknown_type),
            Err(HandlerError::InvalidPayload(_))
        ));

        let empty_recipient = json!({"notification_type": "sms", "recipient": " ", "message": "y"});
        assert!(NotificationRequest::from_data(&empty_recipient).is_err());

        let missing_message = json!({"notification_type": "sms", "recipient": "+100"});
        assert!(NotificationRequest::from_data(&missing_message).is_err());
    }

    #[test]
    fn test_into_new_records_task_id() {
        let new = NotificationRequest::from_data(&data()).unwrap().into_new("task-1");
        assert_eq!(new.metadata["task_id"], "task-1");
        assert_eq!(new.metadata["incident"], 7);
    }

    #[tokio::test]
    async fn test_send_marks_sent() {
        let handler = handler(Arc::new(LogChannel)).await;
        let task = Uuid::new_v4();

        handler.handle(&ctx(task, data())).await.unwrap();

        let notification = handler
            .ledger()
            .find_by_task(&task.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.status, NotificationStatus::Sent);
        assert!(notification.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_then_redelivery_reuses_notification() {
        let channel = Arc::new(FlakyChannel {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let handler = handler(channel.clone()).await;
        let task = Uuid::new_v4();

        let first = handler.handle(&ctx(task, data())).await;
        assert!(matches!(first, Err(HandlerError::Downstream(_))));

        let failed = handler
            .ledger()
            .find_by_task(&task.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.error_message.unwrap().contains("502"));

        handler.handle(&ctx(task, data())).await.unwrap();

        let all = handler.ledger().list(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, NotificationStatus::Sent);

        let statuses: Vec<_> = handler
            .ledger()
            .history(all[0].id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                NotificationStatus::Pending,
                NotificationStatus::Failed,
                NotificationStatus::Retry,
                NotificationStatus::Sent,
            ]
        );
    }

    #[tokio::test]
    async fn test_already_sent_is_not_resent() {
        let channel = Arc::new(FlakyChannel {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let handler = handler(channel.clone()).await;
        let task = Uuid::new_v4();

        handler.handle(&ctx(task, data())).await.unwrap();
        handler.handle(&ctx(task, data())).await.unwrap();

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_records_nothing() {
        let handler = handler(Arc::new(LogChannel)).await;

        let result = handler.handle(&ctx(Uuid::new_v4(), json!({"recipient": "x"}))).await;

        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
        assert!(handler.ledger().list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = NotifyHandlerConfig {
            ledger_path: dir.path().join("notifications.db"),
            ..Default::default()
        };

        let handler = NotificationHandler::from_config(&config, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.channel_name(), "log");

        config.webhook_url = Some("http://127.0.0.1:9/hook".to_string());
        let handler = NotificationHandler::from_config(&config, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.channel_name(), "webhook");

        config.enabled = false;
        assert!(NotificationHandler::from_config(&config, Duration::from_secs(1))
            .await
            .unwrap()
            .is_none());
    }
