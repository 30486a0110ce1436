//! Job lifecycle tests: status transitions, retry accounting and the
//! creation surface, driven through the store and single processor scans.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kiln::processor::{GeneratorSet, JobProcessor, JobProcessorBuilder};
use kiln::{
    GenerationError, JobFilter, JobId, JobKind, JobResult, JobService, JobStatus, JobStore,
    ProcessorConfig, StoreConfig,
};
use kiln_testkit::{
    cartoonize_input, coloring_page_input, illustration_input, image, invalid_story_input,
    story_input, story_result, wait_for_job, wait_until, InMemoryTables, ScriptedGenerator,
    TestGenerators,
};

const DEADLINE: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<JobStore<InMemoryTables>>,
    service: JobService<InMemoryTables>,
    processor: JobProcessor<InMemoryTables>,
}

fn harness(generators: GeneratorSet) -> Harness {
    let store = Arc::new(JobStore::new(InMemoryTables::new(), StoreConfig::default()));
    let service = JobService::new(Arc::clone(&store));
    let processor = JobProcessorBuilder::new(ProcessorConfig::default())
        .with_store(Arc::clone(&store))
        .with_generators(generators)
        .build()
        .expect("processor should build");
    Harness {
        store,
        service,
        processor,
    }
}

async fn create(service: &JobService<InMemoryTables>, input: kiln::JobInput) -> JobId {
    service
        .create(input, Some("user-42".into()))
        .await
        .expect("job should be created")
}

#[tokio::test]
async fn first_progress_starts_the_job() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, cartoonize_input()).await;

    let view = h.service.get(id).await.expect("job should exist");
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.progress, 0);
    assert_eq!(view.kind, JobKind::Cartoonize);
    assert!(view.started_at.is_none());

    assert!(h.store.update_progress(id, 1, None).await);

    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.progress, 1);
    assert!(job.started_at.is_some());
}

#[tokio::test]
async fn zero_progress_keeps_the_job_pending() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, illustration_input()).await;

    assert!(h.store.update_progress(id, 0, Some("Queued")).await);

    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.current_step.as_deref(), Some("Queued"));
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn progress_is_clamped_and_never_regresses() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, story_input()).await;

    assert!(h.store.update_progress(id, 40, Some("Drafting")).await);
    assert!(h.store.update_progress(id, 20, Some("Revising")).await);
    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.progress, 40);
    assert_eq!(job.current_step.as_deref(), Some("Revising"));

    assert!(h.store.update_progress(id, 250, None).await);
    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.progress, 100);
    assert_eq!(job.status, JobStatus::Processing);
}

#[tokio::test]
async fn started_at_is_stamped_once() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, story_input()).await;

    h.store.update_progress(id, 5, None).await;
    let first = h.store.find_by_id(id).await.and_then(|job| job.started_at);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.store.update_progress(id, 50, None).await;
    let second = h.store.find_by_id(id).await.and_then(|job| job.started_at);

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn completion_is_idempotent() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, story_input()).await;
    h.store.update_progress(id, 10, None).await;

    assert!(h.store.mark_completed(id, JobResult::Story(story_result())).await);
    let first = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(first.progress, 100);
    assert!(first.completed_at.is_some());

    assert!(h.store.mark_completed(id, JobResult::Story(story_result())).await);
    let second = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(second.completed_at, first.completed_at);
    assert_eq!(second.updated_at, first.updated_at);
}

#[tokio::test]
async fn completion_with_another_kinds_result_is_rejected() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, story_input()).await;

    let wrong = JobResult::ColoringPage(image("https://cdn.example.test/out/x.png"));
    assert!(!h.store.mark_completed(id, wrong).await);
    assert_eq!(h.store.status_of(id).await, Some(JobStatus::Pending));
}

#[tokio::test]
async fn terminal_jobs_reject_progress_and_cancel() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, coloring_page_input()).await;
    h.store
        .mark_completed(
            id,
            JobResult::ColoringPage(image("https://cdn.example.test/out/page.png")),
        )
        .await;

    assert!(!h.store.update_progress(id, 50, None).await);
    assert!(!h.service.cancel(id).await);
    assert_eq!(h.store.status_of(id).await, Some(JobStatus::Completed));
}

#[tokio::test]
async fn manual_failure_requeues_until_retries_run_out() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, illustration_input()).await;

    for attempt in 1..=3 {
        h.store.update_progress(id, 30, None).await;
        assert!(h.store.mark_failed(id, "model overloaded", true).await);
        let job = h.store.find_by_id(id).await.expect("job should exist");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, attempt);
        assert_eq!(job.progress, 0);
        assert_eq!(
            job.current_step.as_deref(),
            Some(format!("Retrying ({attempt}/3)").as_str())
        );
    }

    assert!(h.store.mark_failed(id, "model overloaded", true).await);
    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.error_message.as_deref(), Some("model overloaded"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn validation_failure_is_terminal_on_first_attempt() {
    let gens = TestGenerators::succeeding();
    let h = harness(gens.set());
    let id = create(&h.service, invalid_story_input()).await;

    let report = h.processor.scan_once().await;
    assert_eq!(report.admitted, vec![id]);

    let job = wait_for_job(&h.store, id, DEADLINE, |job| job.status.is_terminal())
        .await
        .expect("job should fail");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert!(job.error_message.is_some());
    assert_eq!(gens.story.calls(), 0, "invalid input never reaches the generator");

    assert!(wait_until(DEADLINE, || h.processor.in_flight() == 0).await);
    let snapshot = h.processor.metrics_snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(
        snapshot.failures_by_category.get(&kiln::ErrorCategory::Validation),
        Some(&1)
    );
}

#[tokio::test]
async fn ai_service_failures_retry_then_fail() {
    let gens = TestGenerators::succeeding();
    let failing = Arc::new(ScriptedGenerator::failing(
        "story-writer",
        GenerationError::ai_service("upstream returned 503"),
    ));
    let set = GeneratorSet::new(
        failing.clone(),
        gens.illustration.clone(),
        gens.cartoonize.clone(),
        gens.coloring_page.clone(),
    );
    let h = harness(set);
    let id = create(&h.service, story_input()).await;

    for attempt in 1..=3u32 {
        let report = h.processor.scan_once().await;
        assert_eq!(report.admitted, vec![id], "attempt {attempt} admitted");

        let job = wait_for_job(&h.store, id, DEADLINE, |job| {
            job.status == JobStatus::Pending && job.retry_count == attempt
        })
        .await
        .expect("job should be requeued");
        assert_eq!(job.progress, 0);
        assert!(wait_until(DEADLINE, || h.processor.in_flight() == 0).await);
    }

    h.processor.scan_once().await;
    let job = wait_for_job(&h.store, id, DEADLINE, |job| job.status.is_terminal())
        .await
        .expect("job should fail");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.error_message.as_deref(), Some("upstream returned 503"));
    assert_eq!(failing.calls(), 4);

    assert!(wait_until(DEADLINE, || h.processor.in_flight() == 0).await);
    let snapshot = h.processor.metrics_snapshot();
    assert_eq!(snapshot.failed, 4);
    assert_eq!(snapshot.failures_by_collaborator.get("story-writer"), Some(&4));
}

#[tokio::test]
async fn cancel_during_execution_is_overwritten_by_completion() {
    let gens = TestGenerators::gated();
    let h = harness(gens.set());
    let id = create(&h.service, cartoonize_input()).await;

    h.processor.scan_once().await;
    let running = wait_for_job(&h.store, id, DEADLINE, |job| {
        job.status == JobStatus::Processing
    })
    .await
    .expect("job should start");
    assert_eq!(running.current_step.as_deref(), Some("Starting cartoonize"));
    assert!(wait_until(DEADLINE, || gens.cartoonize.calls() == 1).await);

    assert!(h.service.cancel(id).await);
    assert_eq!(h.store.status_of(id).await, Some(JobStatus::Cancelled));

    gens.release_all(1);
    let job = wait_for_job(&h.store, id, DEADLINE, |job| {
        job.status == JobStatus::Completed
    })
    .await
    .expect("completion should land after cancel");
    assert!(job.result.is_some());
    assert!(wait_until(DEADLINE, || h.processor.in_flight() == 0).await);
}

#[tokio::test]
async fn retryable_failure_after_cancel_keeps_the_job_cancelled() {
    let gens = TestGenerators::succeeding();
    let cartoonizer = Arc::new(
        ScriptedGenerator::failing(
            "cartoonizer",
            GenerationError::ai_service("upstream returned 503"),
        )
        .gated(),
    );
    let set = GeneratorSet::new(
        gens.story.clone(),
        gens.illustration.clone(),
        cartoonizer.clone(),
        gens.coloring_page.clone(),
    );
    let h = harness(set);
    let id = create(&h.service, cartoonize_input()).await;

    h.processor.scan_once().await;
    assert!(wait_until(DEADLINE, || cartoonizer.calls() == 1).await);
    assert!(h.service.cancel(id).await);

    cartoonizer.release(1);
    assert!(wait_until(DEADLINE, || cartoonizer.finished() == 1).await);
    assert!(wait_until(DEADLINE, || h.processor.in_flight() == 0).await);

    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.retry_count, 0);
    assert!(job.completed_at.is_some());

    let report = h.processor.scan_once().await;
    assert!(report.admitted.is_empty());
    assert_eq!(cartoonizer.calls(), 1);
}

#[tokio::test]
async fn late_failure_does_not_reopen_terminal_jobs() {
    let h = harness(TestGenerators::succeeding().set());

    let cancelled = create(&h.service, cartoonize_input()).await;
    h.store.update_progress(cancelled, 10, None).await;
    assert!(h.service.cancel(cancelled).await);
    assert!(!h.store.mark_failed(cancelled, "model overloaded", true).await);
    let job = h.store.find_by_id(cancelled).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_at.is_some());
    assert!(h.store.list_pending(&JobFilter::default(), 10).await.is_empty());

    let completed = create(&h.service, story_input()).await;
    h.store
        .mark_completed(completed, JobResult::Story(story_result()))
        .await;
    assert!(h.store.record_failure(completed, "model overloaded", true).await.is_none());
    let job = h.store.find_by_id(completed).await.expect("job should exist");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(JobResult::Story(story_result())));
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn cancelled_pending_job_is_never_dispatched() {
    let gens = TestGenerators::succeeding();
    let h = harness(gens.set());
    let id = create(&h.service, illustration_input()).await;

    assert!(h.service.cancel(id).await);
    let report = h.processor.scan_once().await;
    assert!(report.admitted.is_empty());
    assert_eq!(gens.illustration.calls(), 0);
}

#[tokio::test]
async fn job_kind_never_changes() {
    let h = harness(TestGenerators::succeeding().set());
    let id = create(&h.service, coloring_page_input()).await;

    h.store.update_progress(id, 10, None).await;
    h.store.mark_failed(id, "bucket write failed", true).await;
    h.store.update_progress(id, 60, None).await;

    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert_eq!(job.kind(), JobKind::ColoringPage);
    assert_eq!(h.store.tables().kind_of(id), Some(JobKind::ColoringPage));
    assert_eq!(h.store.tables().len(JobKind::ColoringPage), 1);
}

#[tokio::test]
async fn service_surface_round_trip() {
    let h = harness(TestGenerators::succeeding().set());
    let mine = create(&h.service, story_input()).await;
    let other = h
        .service
        .create(illustration_input(), Some("user-7".into()))
        .await
        .expect("job should be created");

    let view = h.service.get(mine).await.expect("job should exist");
    assert_eq!(view.id, mine.to_string());
    assert_eq!(view.owner_id.as_deref(), Some("user-42"));
    assert_eq!(view.max_retries, 3);
    assert_eq!(view.input_data, story_input());
    assert!(view.result_data.is_none());

    let listed = h.service.list(JobFilter::for_owner("user-42")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.to_string());

    let everything = h.service.list(JobFilter::default().with_limit(1)).await;
    assert_eq!(everything.len(), 1);

    assert!(h.service.cancel(other).await);
    assert!(!h.service.cancel(other).await);
    assert!(!h.service.cancel(JobId::new()).await);
    assert!(h.service.get(JobId::new()).await.is_none());
}

#[tokio::test]
async fn create_reports_failure_when_the_table_is_down() {
    let h = harness(TestGenerators::succeeding().set());
    h.store.tables().fail_kind(JobKind::Story);

    assert!(h.service.create(story_input(), None).await.is_none());
    assert!(h.service.create(cartoonize_input(), None).await.is_some());
}

#[tokio::test]
async fn created_at_is_set_by_the_service() {
    let h = harness(TestGenerators::succeeding().set());
    let before = Utc::now();
    let id = create(&h.service, story_input()).await;

    let job = h.store.find_by_id(id).await.expect("job should exist");
    assert!(job.created_at >= before);
    assert_eq!(job.created_at, job.updated_at);
}
