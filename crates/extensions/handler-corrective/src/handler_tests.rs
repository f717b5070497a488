    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::outputs::tests::seed;

    /// Advisor that returns a fixed reply and remembers its queries.
    struct RecordingAdvisor {
        queries: Mutex<Vec<String>>,
        reply: Result<String, String>,
    }

    #[async_trait]
    impl CorrectiveActionAdvisor for RecordingAdvisor {
        async fn advise(&self, incident: &str) -> Result<String, HandlerError> {
            self.queries.lock().unwrap().push(incident.to_string());
            self.reply.clone().map_err(HandlerError::Downstream)
        }
    }

    fn ctx(data: Value) -> TaskContext {
        TaskContext {
            id: Uuid::new_v4(),
            tag: TASK_TAG.to_string(),
            data,
            attempt: 1,
        }
    }

    async fn setup(reply: Result<String, String>) -> (TempDir, Arc<RecordingAdvisor>, CorrectiveActionHandler) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incident_iq.db");
        seed(&path, &["X1", "42"]);

        let advisor = Arc::new(RecordingAdvisor {
            queries: Default::default(),
            reply,
        });
        let outputs = ClassifierOutputs::open(&path, Duration::from_secs(1)).await.unwrap();
        let handler = CorrectiveActionHandler::new(advisor.clone(), outputs);
        (dir, advisor, handler)
    }

    fn stored_action(dir: &TempDir, payload_id: &str) -> Option<String> {
        let conn = rusqlite::Connection::open(dir.path().join("incident_iq.db")).unwrap();
        conn.query_row(
            "SELECT corrective_action FROM classifier_outputs WHERE payload_id = ?1",
            [payload_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_request_parsing() {
        let request = CorrectiveRequest::from_data(&json!({"payload_id": "X1", "error_message": "disk full"})).unwrap();
        assert_eq!(request.payload_id().unwrap(), "X1");
        assert_eq!(request.description(), "disk full");

        let request = CorrectiveRequest::from_data(&json!({"payload_id": 42})).unwrap();
        assert_eq!(request.payload_id().unwrap(), "42");
        assert_eq!(request.description(), NO_DESCRIPTION);
    }

    #[test]
    fn test_request_double_encoded() {
        let data = Value::String(r#"{"payload_id": "X1", "error_message": "timeout"}"#.to_string());
        let request = CorrectiveRequest::from_data(&data).unwrap();
        assert_eq!(request.payload_id().unwrap(), "X1");
        assert_eq!(request.description(), "timeout");
    }

    #[test]
    fn test_request_missing_payload_id() {
        let request = CorrectiveRequest::from_data(&json!({"error_message": "x"})).unwrap();
        assert!(matches!(request.payload_id(), Err(HandlerError::InvalidPayload(_))));

        let request = CorrectiveRequest::from_data(&json!({"payload_id": "  "})).unwrap();
        assert!(request.payload_id().is_err());

        assert!(CorrectiveRequest::from_data(&json!(17)).is_err());
        assert!(CorrectiveRequest::from_data(&Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_handle_stores_action() {
        let (dir, advisor, handler) = setup(Ok("Restart the connection pool".to_string())).await;

        handler
            .handle(&ctx(json!({"payload_id": "X1", "error_message": "pool exhausted"})))
            .await
            .unwrap();

        assert_eq!(stored_action(&dir, "X1").as_deref(), Some("Restart the connection pool"));
        assert_eq!(*advisor.queries.lock().unwrap(), vec!["pool exhausted".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_numeric_payload_id() {
        let (dir, _advisor, handler) = setup(Ok("Scale out".to_string())).await;

        handler.handle(&ctx(json!({"payload_id": 42}))).await.unwrap();
        assert_eq!(stored_action(&dir, "42").as_deref(), Some("Scale out"));
    }

    #[tokio::test]
    async fn test_handle_unknown_payload() {
        let (_dir, _advisor, handler) = setup(Ok("anything".to_string())).await;

        let result = handler.handle(&ctx(json!({"payload_id": "nope"}))).await;
        assert!(matches!(result, Err(HandlerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_handle_missing_payload_id_skips_advisor() {
        let (_dir, advisor, handler) = setup(Ok("anything".to_string())).await;

        let result = handler.handle(&ctx(json!({"error_message": "x"}))).await;
        assert!(matches!(result, Err(HandlerError::InvalidPayload(_))));
        assert!(advisor.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_advisor_failure_leaves_row_untouched() {
        let (dir, _advisor, handler) = setup(Err("vector store offline".to_string())).await;

        let result = handler.handle(&ctx(json!({"payload_id": "X1"}))).await;
        assert!(matches!(result, Err(HandlerError::Downstream(_))));
        assert!(stored_action(&dir, "X1").is_none());
    }

    #[tokio::test]
    async fn test_default_ack_policy_is_before_execute() {
        let (_dir, _advisor, handler) = setup(Ok("x".to_string())).await;
        assert_eq!(handler.default_ack_policy(), AckPolicy::BeforeExecute);
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let queue_db = dir.path().join("queue.db");

        let mut config = CorrectiveHandlerConfig::default();
        let none = CorrectiveActionHandler::from_config(&config, &queue_db, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(none.is_none());

        config.advisor_url = Some("http://127.0.0.1:9/advise".to_string());
        let handler = CorrectiveActionHandler::from_config(&config, &queue_db, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(handler.is_some());
    }
