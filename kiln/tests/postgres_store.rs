//! Integration tests for the PostgreSQL per-kind tables behind the store
//! router.
//!
//! Requires a running Postgres instance; the tables are created on demand.
//! Run with: `cargo test --test postgres_store --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;

use kiln::persistence::PgKindTables;
use kiln::{
    JobFilter, JobKind, JobResult, JobService, JobStatus, JobStore, PersistenceConfig,
    StoreConfig,
};
use kiln_testkit::{cartoonize_input, coloring_page_input, image, story_input, story_result};
use sqlx::PgPool;
use uuid::Uuid;

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = PersistenceConfig::new(url)
        .with_max_connections(4)
        .connect()
        .await
        .expect("connect");
    PgKindTables::new(pool.clone())
        .migrate()
        .await
        .expect("migrate");
    pool
}

async fn cleanup(pool: &PgPool, owner: &str) {
    for kind in JobKind::ALL {
        sqlx::query(&format!("DELETE FROM {} WHERE owner_id = $1", kind.table()))
            .bind(owner)
            .execute(pool)
            .await
            .ok();
    }
}

fn service(pool: &PgPool, kind_index: bool) -> JobService<PgKindTables> {
    let store = JobStore::new(
        PgKindTables::new(pool.clone()),
        StoreConfig::default().with_kind_index(kind_index),
    );
    JobService::new(Arc::new(store))
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn job_round_trips_through_its_table() {
    let pool = connect().await;
    let owner = format!("pg-test-{}", Uuid::new_v4());
    let service = service(&pool, false);

    let id = service
        .create(cartoonize_input(), Some(owner.clone()))
        .await
        .expect("create");

    let view = service.get(id).await.expect("job should resolve");
    assert_eq!(view.kind, JobKind::Cartoonize);
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.input_data, cartoonize_input());

    let store = service.store();
    assert!(store.update_progress(id, 40, Some("Tracing outlines")).await);
    let result = JobResult::Cartoonize(image("https://cdn.example.test/out/pg.png"));
    assert!(store.mark_completed(id, result.clone()).await);

    let job = store.find_by_id(id).await.expect("job should resolve");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.result, Some(result));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    cleanup(&pool, &owner).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn retry_accounting_is_persisted() {
    let pool = connect().await;
    let owner = format!("pg-test-{}", Uuid::new_v4());
    let service = service(&pool, true);

    let id = service
        .create(story_input(), Some(owner.clone()))
        .await
        .expect("create");
    let store = service.store();

    for attempt in 1..=3 {
        store.update_progress(id, 10, None).await;
        assert!(store.mark_failed(id, "rate limit exceeded", true).await);
        let job = store.find_by_id(id).await.expect("job should resolve");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, attempt);
    }

    assert!(store.mark_failed(id, "rate limit exceeded", true).await);
    let job = store.find_by_id(id).await.expect("job should resolve");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);

    cleanup(&pool, &owner).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn listing_spans_every_table() {
    let pool = connect().await;
    let owner = format!("pg-test-{}", Uuid::new_v4());
    let service = service(&pool, true);

    let story = service
        .create(story_input(), Some(owner.clone()))
        .await
        .expect("create");
    let page = service
        .create(coloring_page_input(), Some(owner.clone()))
        .await
        .expect("create");

    let listed = service.list(JobFilter::for_owner(owner.clone())).await;
    let ids: Vec<_> = listed.iter().map(|view| view.id.clone()).collect();
    assert_eq!(ids, vec![page.to_string(), story.to_string()]);

    let pending = service
        .store()
        .list_pending(&JobFilter::for_owner(owner.clone()), 10)
        .await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, story);

    assert!(
        service
            .store()
            .mark_completed(story, JobResult::Story(story_result()))
            .await
    );
    assert!(!service.cancel(story).await);
    assert!(service.cancel(page).await);

    cleanup(&pool, &owner).await;
}
