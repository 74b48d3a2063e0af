// End-to-end pipeline behaviour against in-memory SQLite and scripted providers.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use copydesk_core::ContentKind;
use copydesk_library::ContentStatus;
use copydesk_providers::mock::{MockGenerator, MockImageGenerator, MockPublisher};
use copydesk_workflow::{
    AutoRunOutcome, PipelineSettings, SessionState, Stage, StageTable, WorkflowError,
    WorkflowMode, WorkflowOrchestrator,
};
use rusqlite::Connection;

struct Harness {
    orchestrator: WorkflowOrchestrator,
    generator: Arc<MockGenerator>,
    images: Arc<MockImageGenerator>,
    publisher: Arc<MockPublisher>,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    copydesk_library::db::init_db(&conn).unwrap();
    copydesk_workflow::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let generator = Arc::new(MockGenerator::new());
    let images = Arc::new(MockImageGenerator::new());
    let publisher = Arc::new(MockPublisher::new());
    let stages = StageTable::new(generator.clone(), images.clone());
    Harness {
        orchestrator: WorkflowOrchestrator::new(db, stages, publisher.clone()),
        generator,
        images,
        publisher,
    }
}

#[tokio::test]
async fn automatic_run_with_optimize_disabled() {
    let h = harness();
    h.orchestrator
        .settings()
        .put(&PipelineSettings {
            enable_optimize: false,
            ..PipelineSettings::defaults(ContentKind::Article)
        })
        .unwrap();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Article, Some("night trains"))
        .unwrap();

    let outcome = h.orchestrator.run_automatic(&session.id).await.unwrap();
    assert_eq!(
        outcome,
        AutoRunOutcome::Completed {
            content_id: session.content_id.clone()
        }
    );

    let detail = h.orchestrator.get_detail(&session.id).unwrap();
    assert_eq!(
        detail.session.stage_data.stages().collect::<Vec<_>>(),
        vec![Stage::Generate, Stage::Image, Stage::Edit]
    );
    assert_eq!(detail.session.current_stage, Stage::Completed);
    assert_eq!(detail.session.progress, 100);
    assert_eq!(h.generator.optimize_count(), 0);
    assert_eq!(detail.content.images.len(), 2);
    assert!(detail.content.title.contains("night trains"));
    // Auto-publish is off by default.
    assert!(h.publisher.published().is_empty());
}

#[tokio::test]
async fn automatic_run_survives_optional_stage_failures() {
    let h = harness();
    h.generator.fail_optimize.store(true, Ordering::SeqCst);
    h.images.fail_all.store(true, Ordering::SeqCst);
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Article, Some("tides"))
        .unwrap();

    let outcome = h.orchestrator.run_automatic(&session.id).await.unwrap();
    assert!(matches!(outcome, AutoRunOutcome::Completed { .. }));

    let status = h.orchestrator.get_status(&session.id).unwrap();
    assert_eq!(status.state, SessionState::Completed);
    let detail = h.orchestrator.get_detail(&session.id).unwrap();
    assert_eq!(
        detail.session.stage_data.stages().collect::<Vec<_>>(),
        vec![Stage::Generate, Stage::Edit]
    );
    assert!(detail.content.images.is_empty());
}

#[tokio::test]
async fn generate_failure_fails_the_run() {
    let h = harness();
    h.generator.fail_generate.store(true, Ordering::SeqCst);
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Microblog, None)
        .unwrap();

    let outcome = h.orchestrator.run_automatic(&session.id).await.unwrap();
    assert!(matches!(outcome, AutoRunOutcome::Failed { stage: Stage::Generate, .. }));

    let status = h.orchestrator.get_status(&session.id).unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.error.is_some());
    assert!(status.summary.is_none());
}

#[tokio::test]
async fn auto_publish_uses_the_first_active_account() {
    let h = harness();
    h.orchestrator
        .settings()
        .put(&PipelineSettings {
            enable_auto_publish: true,
            ..PipelineSettings::defaults(ContentKind::Microblog)
        })
        .unwrap();
    h.orchestrator
        .library()
        .add_account("main", "uid-1", serde_json::json!([{"name": "sid"}]))
        .unwrap();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Microblog, Some("rain"))
        .unwrap();

    h.orchestrator.run_automatic(&session.id).await.unwrap();

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].content_id, session.content_id);
    assert_eq!(published[0].title, None);
    let item = h.orchestrator.library().require(&session.content_id).unwrap();
    assert_eq!(item.status, ContentStatus::Published);
}

#[tokio::test]
async fn manual_session_walks_every_stage() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Manual, ContentKind::Article, Some("harbour towns"))
        .unwrap();

    let first = h
        .orchestrator
        .process_message(&session.id, "Write about harbour towns", None)
        .await
        .unwrap();
    assert_eq!(first.stage, Stage::Generate);
    assert!(first.can_proceed);

    let second = h
        .orchestrator
        .process_message(&session.id, "Shorter please", None)
        .await
        .unwrap();
    assert!(second.preview.unwrap().title.starts_with("Revised draft"));
    let calls = h.generator.generate_calls();
    assert!(calls[0].revision.is_none());
    assert_eq!(calls[1].revision.as_ref().unwrap().history.len(), 2);

    let adv = h.orchestrator.advance_stage(&session.id).await.unwrap();
    assert_eq!((adv.previous_stage, adv.current_stage, adv.progress), (Stage::Generate, Stage::Optimize, 25));
    assert!(adv.initial_reply.is_some());

    let adv = h.orchestrator.advance_stage(&session.id).await.unwrap();
    assert_eq!(adv.current_stage, Stage::Image);
    assert!(adv.initial_reply.unwrap().contains("Planned 2 illustrations"));

    h.orchestrator
        .process_message(&session.id, "generate all", None)
        .await
        .unwrap();
    let adv = h.orchestrator.advance_stage(&session.id).await.unwrap();
    assert_eq!(adv.current_stage, Stage::Edit);

    h.orchestrator
        .process_message(&session.id, "title: Harbour Towns at Dusk", None)
        .await
        .unwrap();
    let adv = h.orchestrator.advance_stage(&session.id).await.unwrap();
    assert_eq!((adv.current_stage, adv.progress), (Stage::Completed, 100));
    assert!(adv.initial_reply.is_none());

    let status = h.orchestrator.get_status(&session.id).unwrap();
    assert_eq!(status.state, SessionState::Completed);
    assert_eq!(status.summary.unwrap().title, "Harbour Towns at Dusk");

    let detail = h.orchestrator.get_detail(&session.id).unwrap();
    assert_eq!(detail.session.stage_data.len(), 4);
    assert_eq!(detail.content.images.len(), 2);
    let image_messages = h.orchestrator.get_messages(&session.id, Some(Stage::Image)).unwrap();
    // opening + user + assistant
    assert_eq!(image_messages.len(), 3);
}

#[tokio::test]
async fn completed_session_rejects_messages_without_logging() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Article, Some("kites"))
        .unwrap();
    h.orchestrator.run_automatic(&session.id).await.unwrap();
    let before = h.orchestrator.get_messages(&session.id, None).unwrap().len();

    let err = h
        .orchestrator
        .process_message(&session.id, "one more change", None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::SessionCompleted(_)));
    assert!(err.is_state_error());
    assert_eq!(h.orchestrator.get_messages(&session.id, None).unwrap().len(), before);

    let err = h.orchestrator.advance_stage(&session.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::SessionCompleted(_)));
}

#[tokio::test]
async fn auto_session_rejects_manual_messages() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Auto, ContentKind::Article, None)
        .unwrap();
    let err = h
        .orchestrator
        .process_message(&session.id, "hello", None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WrongMode { .. }));
}

#[tokio::test]
async fn advance_is_refused_until_the_draft_is_complete() {
    let h = harness();
    h.generator.blank_title.store(true, Ordering::SeqCst);
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Manual, ContentKind::Article, Some("bees"))
        .unwrap();
    let reply = h
        .orchestrator
        .process_message(&session.id, "go", None)
        .await
        .unwrap();
    assert!(!reply.can_proceed);

    let before = h.orchestrator.get_detail(&session.id).unwrap().session;
    let err = h.orchestrator.advance_stage(&session.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::StageIncomplete { stage: Stage::Generate, .. }));

    let after = h.orchestrator.get_detail(&session.id).unwrap().session;
    assert_eq!(after.current_stage, Stage::Generate);
    assert_eq!(after.progress, before.progress);
    assert!(after.stage_data.is_empty());
}

#[tokio::test]
async fn status_reads_are_stable() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Manual, ContentKind::Article, None)
        .unwrap();
    let a = h.orchestrator.get_status(&session.id).unwrap();
    let b = h.orchestrator.get_status(&session.id).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.state, SessionState::Processing);
    assert_eq!(a.progress, 0);

    let missing = h.orchestrator.get_status("nope").unwrap_err();
    assert!(matches!(missing, WorkflowError::SessionNotFound(_)));
}

#[tokio::test]
async fn stage_data_only_grows() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(WorkflowMode::Manual, ContentKind::Article, Some("maps"))
        .unwrap();
    h.orchestrator
        .process_message(&session.id, "draft it", None)
        .await
        .unwrap();

    let mut seen = 0;
    for _ in 0..4 {
        h.orchestrator.advance_stage(&session.id).await.unwrap();
        let data = h.orchestrator.get_detail(&session.id).unwrap().session.stage_data;
        assert!(data.len() > seen);
        seen = data.len();
    }
    assert_eq!(seen, 4);
}
