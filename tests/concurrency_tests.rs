/// Concurrency tests
///
/// Saves on the same parent are serialized; stale editors are turned away
/// Run with: cargo test --test concurrency_tests

use nestsync::{
    Association, AttributeSet, Batch, EntityId, FieldMap, InMemoryStore, NestError, NestedWriter,
    SaveRequest, TableDef, Value,
};
use std::sync::Arc;
use tokio::sync::Barrier;

fn fields(pairs: &[(&str, Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

async fn projects(count: usize) -> Arc<NestedWriter<InMemoryStore>> {
    let store = Arc::new(InMemoryStore::new());
    store.create_table(TableDef::new("projects")).await.unwrap();
    store
        .create_table(TableDef::new("tasks").unique(["project_id", "name"]))
        .await
        .unwrap();
    for i in 0..count {
        store
            .seed("projects", fields(&[("name", Value::from(format!("project_{}", i)))]))
            .await
            .unwrap();
    }

    Arc::new(
        NestedWriter::new(store)
            .association("projects", Association::has_many("tasks", "tasks", "project_id")),
    )
}

#[tokio::test]
async fn test_concurrent_saves_on_same_parent() {
    let writer = projects(1).await;
    let num_tasks = 10;
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for task_id in 0..num_tasks {
        let writer = Arc::clone(&writer);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let batch = Batch::new().with(AttributeSet::new().field("name", format!("task_{}", task_id)));
            writer
                .save(SaveRequest::new("projects", 1u64, "tasks").batch(batch))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let graph = writer.load("projects", EntityId(1), "tasks").await.unwrap();
    assert_eq!(graph.children.len(), num_tasks);
    assert_eq!(graph.parent.version, 1 + num_tasks as i64);
    assert_eq!(writer.store().active_transactions().await, 0);
}

#[tokio::test]
async fn test_stale_editor_is_rejected() {
    let writer = projects(1).await;

    // both editors loaded version 1
    let first = SaveRequest::new("projects", 1u64, "tasks")
        .expected_version(1)
        .batch(Batch::new().with(AttributeSet::new().field("name", "from first")));
    let second = SaveRequest::new("projects", 1u64, "tasks")
        .expected_version(1)
        .batch(Batch::new().with(AttributeSet::new().field("name", "from second")));

    writer.save(first).await.unwrap();
    let err = writer.save(second).await.unwrap_err();

    assert!(matches!(err, NestError::StaleParent { expected: 1, actual: 2 }));
    let graph = writer.load("projects", EntityId(1), "tasks").await.unwrap();
    assert_eq!(graph.children.len(), 1);
}

#[tokio::test]
async fn test_racing_stale_checks_let_one_through() {
    let writer = projects(1).await;
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = vec![];
    for name in ["left", "right"] {
        let writer = Arc::clone(&writer);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            writer
                .save(
                    SaveRequest::new("projects", 1u64, "tasks")
                        .expected_version(1)
                        .batch(Batch::new().with(AttributeSet::new().field("name", name))),
                )
                .await
        }));
    }

    let mut committed = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(NestError::StaleParent { .. }) => stale += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!((committed, stale), (1, 1));
}

#[tokio::test]
async fn test_different_parents_do_not_interfere() {
    let writer = projects(4).await;

    let mut handles = vec![];
    for parent in 1..=4u64 {
        let writer = Arc::clone(&writer);
        handles.push(tokio::spawn(async move {
            for round in 0..5 {
                let batch = Batch::new().with(AttributeSet::new().field("name", format!("round_{}", round)));
                writer
                    .save(SaveRequest::new("projects", parent, "tasks").batch(batch))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for parent in 1..=4u64 {
        let graph = writer.load("projects", EntityId(parent), "tasks").await.unwrap();
        assert_eq!(graph.children.len(), 5, "parent {} has a wrong collection", parent);
        assert!(
            graph
                .children
                .iter()
                .all(|child| child.reference("project_id") == Some(EntityId(parent)))
        );
    }
}
