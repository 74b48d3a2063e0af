// Task executor against in-memory SQLite and scripted providers.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use copydesk_core::ContentKind;
use copydesk_library::{AccountStatus, ContentItem, ContentStatus, LibraryStore};
use copydesk_providers::mock::{MockGenerator, MockImageGenerator, MockPublisher};
use copydesk_scheduler::{
    FireOrigin, JobKind, LogStatus, NewScheduledTask, PublishMode, PublishOrder, ScheduleSpec,
    TaskExecutor, TaskStore, TopicMode,
};
use copydesk_workflow::{StageTable, WorkflowOrchestrator};
use rusqlite::Connection;

struct Harness {
    executor: TaskExecutor,
    tasks: TaskStore,
    library: LibraryStore,
    generator: Arc<MockGenerator>,
    publisher: Arc<MockPublisher>,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    copydesk_library::db::init_db(&conn).unwrap();
    copydesk_workflow::db::init_db(&conn).unwrap();
    copydesk_scheduler::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let generator = Arc::new(MockGenerator::new());
    let images = Arc::new(MockImageGenerator::new());
    let publisher = Arc::new(MockPublisher::new());
    let orchestrator = WorkflowOrchestrator::new(
        db.clone(),
        StageTable::new(generator.clone(), images),
        publisher.clone(),
    );
    let tasks = TaskStore::new(db.clone());
    let library = LibraryStore::new(db);
    Harness {
        executor: TaskExecutor::new(tasks.clone(), library.clone(), orchestrator, publisher.clone()),
        tasks,
        library,
        generator,
        publisher,
    }
}

fn every_hour(kind: JobKind) -> NewScheduledTask {
    NewScheduledTask::new(
        "hourly",
        kind,
        ContentKind::Article,
        ScheduleSpec::FixedInterval { minutes: 60 },
    )
}

fn seed_drafts(library: &LibraryStore, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let mut item = ContentItem::draft(ContentKind::Article, None);
            item.title = format!("Draft {i}");
            item.body = format!("Body {i}");
            // Distinct, increasing creation times.
            item.created_at = format!("2024-01-01T00:00:0{i}.000000Z");
            library.insert(&item).unwrap();
            item.id
        })
        .collect()
}

#[tokio::test]
async fn batch_publish_takes_the_oldest_drafts() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    let ids = seed_drafts(&h.library, 5);
    let mut new = every_hour(JobKind::Publish);
    new.publish_mode = PublishMode::Batch;
    new.publish_batch_size = 2;
    new.publish_order = PublishOrder::Oldest;
    new.account_id = Some(account.id.clone());
    let task = h.tasks.create(&new).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(report.success);
    assert_eq!((report.published_count, report.total_count), (2, 2));

    for (i, id) in ids.iter().enumerate() {
        let item = h.library.require(id).unwrap();
        let expected = if i < 2 { ContentStatus::Published } else { ContentStatus::Draft };
        assert_eq!(item.status, expected, "draft {i}");
    }
    let logs = h.tasks.logs_for_task(&task.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == LogStatus::Completed && l.kind == JobKind::Publish));
    assert_eq!(logs[0].content_id.as_deref(), Some(ids[0].as_str()));

    let task = h.tasks.require(&task.id).unwrap();
    assert_eq!(task.run_count, 1);
    assert!(task.last_error.is_none());
}

#[tokio::test]
async fn newest_order_and_partial_failure() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    let ids = seed_drafts(&h.library, 3);
    h.publisher.reject(&ids[2]);
    let mut new = every_hour(JobKind::Publish);
    new.publish_mode = PublishMode::All;
    new.publish_order = PublishOrder::Newest;
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Manual).await.unwrap();
    assert!(!report.success);
    assert_eq!((report.published_count, report.total_count), (2, 3));
    assert_eq!(h.publisher.published()[0].content_id, ids[2]);
    assert_eq!(h.library.require(&ids[2]).unwrap().status, ContentStatus::Failed);

    let logs = h.tasks.logs_for_task(&task.id).unwrap();
    assert_eq!(logs.iter().filter(|l| l.status == LogStatus::Failed).count(), 1);
    assert_eq!(h.tasks.require(&task.id).unwrap().last_error.as_deref(), Some("published 2 of 3"));
}

#[tokio::test]
async fn empty_candidate_set_is_a_quiet_success() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    let mut new = every_hour(JobKind::Publish);
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(report.success);
    assert_eq!((report.published_count, report.total_count), (0, 0));
    assert!(h.tasks.logs_for_task(&task.id).unwrap().is_empty());
}

#[tokio::test]
async fn publish_without_usable_account_is_recorded() {
    let h = harness();
    seed_drafts(&h.library, 1);
    let task = h.tasks.create(&every_hour(JobKind::Publish)).unwrap();
    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(!report.success);
    assert!(report.error.unwrap().contains("names no account"));

    let account = h.library.add_account("old", "uid", serde_json::json!([])).unwrap();
    h.library.set_account_status(&account.id, AccountStatus::Expired).unwrap();
    let mut new = every_hour(JobKind::GenerateAndPublish);
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();
    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(!report.success);
    // The account is checked before any content is generated.
    assert!(h.generator.generate_calls().is_empty());
    assert_eq!(h.tasks.require(&task.id).unwrap().run_count, 1);
}

#[tokio::test]
async fn list_topics_cycle_in_order() {
    let h = harness();
    let mut new = every_hour(JobKind::Generate);
    new.topic_mode = TopicMode::List;
    new.topics = vec!["A".into(), "B".into(), "C".into()];
    let task = h.tasks.create(&new).unwrap();

    for _ in 0..4 {
        let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
        assert!(report.success);
        assert!(report.content_id.is_some());
    }

    let topics: Vec<Option<String>> = h
        .generator
        .generate_calls()
        .into_iter()
        .map(|req| req.topic_hint)
        .collect();
    let expected: Vec<Option<String>> = ["A", "B", "C", "A"].iter().map(|t| Some(t.to_string())).collect();
    assert_eq!(topics, expected);
    let task = h.tasks.require(&task.id).unwrap();
    assert_eq!(task.current_topic_index, 1);
    assert_eq!(task.run_count, 4);
}

#[tokio::test]
async fn fixed_topic_never_moves_the_cursor() {
    let h = harness();
    let mut new = every_hour(JobKind::Generate);
    new.topic_mode = TopicMode::Fixed;
    new.topics = vec!["gardening".into(), "ignored".into()];
    let task = h.tasks.create(&new).unwrap();
    let executor = &h.executor;

    assert_eq!(executor.resolve_topic(&task).unwrap().as_deref(), Some("gardening"));
    assert_eq!(executor.resolve_topic(&task).unwrap().as_deref(), Some("gardening"));
    assert_eq!(h.tasks.require(&task.id).unwrap().current_topic_index, 0);
}

#[tokio::test]
async fn generate_failure_is_reported_not_raised() {
    let h = harness();
    h.generator.fail_generate.store(true, Ordering::SeqCst);
    let task = h.tasks.create(&every_hour(JobKind::Generate)).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(!report.success);
    let logs = h.tasks.logs_for_task(&task.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert!(logs[0].error.is_some());
    assert!(h.tasks.require(&task.id).unwrap().last_error.is_some());

    assert!(h.executor.execute("missing", FireOrigin::Manual).await.is_err());
}

#[tokio::test]
async fn generate_and_publish_covers_one_item() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    let mut new = every_hour(JobKind::GenerateAndPublish);
    new.topic_mode = TopicMode::Fixed;
    new.topics = vec!["lighthouses".into()];
    new.account_id = Some(account.id.clone());
    let task = h.tasks.create(&new).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(report.success);
    let content_id = report.content_id.unwrap();
    assert_eq!(h.library.require(&content_id).unwrap().status, ContentStatus::Published);
    assert_eq!(h.publisher.published().len(), 1);

    let logs = h.tasks.logs_for_task(&task.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, JobKind::GenerateAndPublish);
    assert_eq!(logs[0].account_id.as_deref(), Some(account.id.as_str()));
    assert_eq!(logs[0].content_id.as_deref(), Some(content_id.as_str()));
}

#[tokio::test]
async fn random_order_respects_the_batch_size() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    seed_drafts(&h.library, 4);
    let mut new = every_hour(JobKind::Publish);
    new.publish_mode = PublishMode::Batch;
    new.publish_batch_size = 3;
    new.publish_order = PublishOrder::Random;
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();

    assert_eq!(h.executor.select_candidates(&task).unwrap().len(), 3);
}

#[tokio::test]
async fn overlapping_firings_publish_each_draft_once() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    let ids = seed_drafts(&h.library, 2);
    h.publisher.latency_ms.store(50, Ordering::SeqCst);
    let mut new = every_hour(JobKind::Publish);
    new.publish_mode = PublishMode::All;
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();

    let (first, second) = tokio::join!(
        h.executor.execute(&task.id, FireOrigin::Scheduled),
        h.executor.execute(&task.id, FireOrigin::Manual),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.success && second.success);
    assert_eq!(first.total_count + second.total_count, 2);
    assert_eq!(first.published_count + second.published_count, 2);

    let mut sent: Vec<String> = h.publisher.published().into_iter().map(|r| r.content_id).collect();
    sent.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(sent, expected);
    for id in &ids {
        assert_eq!(h.library.require(id).unwrap().status, ContentStatus::Published);
    }
    assert_eq!(h.tasks.logs_for_task(&task.id).unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_publisher_keeps_the_generated_content_id() {
    let h = harness();
    let account = h.library.add_account("main", "uid", serde_json::json!([])).unwrap();
    h.publisher.unreachable.store(true, Ordering::SeqCst);
    let mut new = every_hour(JobKind::GenerateAndPublish);
    new.account_id = Some(account.id);
    let task = h.tasks.create(&new).unwrap();

    let report = h.executor.execute(&task.id, FireOrigin::Scheduled).await.unwrap();
    assert!(!report.success);
    let content_id = report.content_id.expect("generated content id");
    assert_eq!(h.library.require(&content_id).unwrap().status, ContentStatus::Failed);

    let logs = h.tasks.logs_for_task(&task.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert_eq!(logs[0].content_id.as_deref(), Some(content_id.as_str()));
}
