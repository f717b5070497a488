    use super::*;

    fn payload(tag: &str) -> String {
        format!(r#"{{"task":"{}","data":{{}}}}"#, tag)
    }

    #[tokio::test]
    async fn test_memory_store_insert_and_get() {
        let store = MemoryTaskStore::new();
        let record = TaskRecord::new(payload("llm_invoke"));
        let id = record.id;

        store.insert(&record).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.seq, 1);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.data, payload("llm_invoke"));
    }

    #[tokio::test]
    async fn test_memory_store_duplicate_id() {
        let store = MemoryTaskStore::new();
        let record = TaskRecord::new(payload("a"));

        store.insert(&record).await.unwrap();
        let result = store.insert(&record).await;
        assert!(matches!(result, Err(QueueError::Storage(_))));
    }

    #[tokio::test]
    async fn test_memory_store_first_pending_is_oldest() {
        let store = MemoryTaskStore::new();
        let first = TaskRecord::new(payload("first"));
        let second = TaskRecord::new(payload("second"));
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let head = store.select_first_pending().await.unwrap().unwrap();
        assert_eq!(head.id, first.id);

        store
            .update_status(&first.id, TaskStatus::Processed, Utc::now())
            .await
            .unwrap();
        let head = store.select_first_pending().await.unwrap().unwrap();
        assert_eq!(head.id, second.id);
    }

    #[tokio::test]
    async fn test_memory_store_update_status_once() {
        let store = MemoryTaskStore::new();
        let record = TaskRecord::new(payload("a"));
        store.insert(&record).await.unwrap();

        let first_at = Utc::now();
        assert!(store
            .update_status(&record.id, TaskStatus::Processed, first_at)
            .await
            .unwrap());
        assert!(!store
            .update_status(&record.id, TaskStatus::Failed, Utc::now())
            .await
            .unwrap());

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processed);
        assert_eq!(loaded.processed_at, Some(first_at));
    }

    #[tokio::test]
    async fn test_memory_store_quarantine_by_seq() {
        let store = MemoryTaskStore::new();
        let first = TaskRecord::new(payload("a"));
        let second = TaskRecord::new(payload("b"));
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        assert!(store.quarantine(1, TaskStatus::Processed, Utc::now()).await.unwrap());
        assert!(!store.quarantine(1, TaskStatus::Failed, Utc::now()).await.unwrap());
        assert!(!store.quarantine(42, TaskStatus::Failed, Utc::now()).await.unwrap());

        let head = store.select_first_pending().await.unwrap().unwrap();
        assert_eq!(head.id, second.id);
        let loaded = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processed);
        assert!(loaded.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_update_missing() {
        let store = MemoryTaskStore::new();
        let result = store
            .update_status(&Uuid::new_v4(), TaskStatus::Processed, Utc::now())
            .await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_store_record_failure() {
        let store = MemoryTaskStore::new();
        let record = TaskRecord::new(payload("a"));
        store.insert(&record).await.unwrap();

        assert_eq!(store.record_failure(&record.id, "boom").await.unwrap(), 1);
        assert_eq!(store.record_failure(&record.id, "boom again").await.unwrap(), 2);

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_error.as_deref(), Some("boom again"));
        assert!(loaded.is_pending());
    }

    #[tokio::test]
    async fn test_memory_store_counts_and_listing() {
        let store = MemoryTaskStore::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let record = TaskRecord::new(payload(&format!("t{}", i)));
            ids.push(record.id);
            store.insert(&record).await.unwrap();
        }
        store
            .update_status(&ids[0], TaskStatus::Processed, Utc::now())
            .await
            .unwrap();
        store
            .update_status(&ids[2], TaskStatus::Failed, Utc::now())
            .await
            .unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Processed), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Failed), Some(&1));

        let pending = store.list_by_status(TaskStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, ids[1]);
        assert_eq!(pending[1].id, ids[3]);

        let limited = store.list_by_status(TaskStatus::Pending, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_empty_counts() {
        let store = MemoryTaskStore::new();
        assert!(store.count_by_status().await.unwrap().is_empty());
        assert!(store.select_first_pending().await.unwrap().is_none());
    }
