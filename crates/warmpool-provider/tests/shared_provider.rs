//! The memory provider behind `Arc<dyn Provider>`, driven from many
//! tasks at once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use warmpool_core::labels::RUNTIME_LABEL;
use warmpool_core::{Container, RevisionTemplate};
use warmpool_provider::{MemoryProvider, Provider, ProviderOperation, SharedProvider};

fn template() -> RevisionTemplate {
    RevisionTemplate {
        name: "1".to_string(),
        min_scale: 0,
        max_scale: 1,
        max_concurrency: 80,
        timeout_secs: 60,
        containers: vec![Container {
            name: "app".to_string(),
            image: "img".to_string(),
            command: None,
            args: vec![],
        }],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_distinct_names() {
    let memory = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(5)));
    let provider: SharedProvider = memory.clone();
    let labels = BTreeMap::from([(RUNTIME_LABEL.to_string(), "web".to_string())]);

    let mut handles = Vec::new();
    for i in 0..16 {
        let provider = Arc::clone(&provider);
        let labels = labels.clone();
        handles.push(tokio::spawn(async move {
            provider
                .create(&format!("web-{i:02}"), &labels, &template())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(memory.service_names().len(), 16);
    assert_eq!(memory.count_calls(ProviderOperation::Create), 16);
    assert_eq!(provider.list_all_revisions().await.unwrap().len(), 16);
}

#[tokio::test]
async fn injected_failure_targets_one_service() {
    let memory = Arc::new(MemoryProvider::new());
    memory.fail_always(ProviderOperation::Delete, Some("web-b"));
    let labels = BTreeMap::new();
    for name in ["web-a", "web-b"] {
        memory.create(name, &labels, &template()).await.unwrap();
    }

    memory.delete("web-a").await.unwrap();
    let err = memory.delete("web-b").await.unwrap_err();
    assert_eq!(err.operation, ProviderOperation::Delete);
    assert_eq!(err.target, "web-b");
    assert_eq!(memory.service_names(), vec!["web-b".to_string()]);
}
