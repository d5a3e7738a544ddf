//! Live integration tests for clank-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database (with the
//! `vector` extension available) spun up by the sqlx test harness.

use chrono::{Duration, TimeZone, Utc};
use clank_core::{ClusterStats, Contribution, FeedbackCustomer, FeedbackMetadata};
use clank_db::{
    add_feedback_tokens, bulk_create_partial_issues, claim_job, complete_job, create_issue,
    delete_breaker_counter, delete_partial_issue, enqueue_job, fail_job, get_breaker_failures,
    get_feedback, get_issue, get_job, get_partial_issue, increment_breaker_failures,
    insert_feedback, insert_organization, insert_product, insert_review, list_partial_issue_ids,
    list_similar_issues, list_unprocessed_feedback_ids, lock_issue, mark_feedback_processed,
    requeue_stale_jobs, retry_job, set_breaker_failures, update_aggregated_issue, Cursor, DbError,
    FeedbackRow, IssueUpdate, NewFeedback, NewIssue, NewJob, NewOrganization, NewPartialIssue,
    NewProduct, NewReview, ProductRow,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_test_product(pool: &sqlx::PgPool) -> ProductRow {
    let org = insert_organization(
        pool,
        &NewOrganization {
            name: "Acme",
            capacity_included: 1000,
            capacity_extra: 0,
            usage_value: 0,
        },
    )
    .await
    .expect("insert_organization failed");

    let categories = vec!["STABILITY".to_string(), "UX".to_string()];
    insert_product(
        pool,
        &NewProduct {
            organization_id: org.id,
            name: "Acme App",
            language: "en",
            context: "A mobile app",
            categories: &categories,
            release: "1.0.0",
        },
    )
    .await
    .expect("insert_product failed")
}

async fn insert_test_feedback(
    pool: &sqlx::PgPool,
    product_id: Uuid,
    content: &str,
    translated_minutes_ago: Option<i64>,
) -> FeedbackRow {
    let customer = FeedbackCustomer {
        name: format!("customer of {content}"),
        ..FeedbackCustomer::default()
    };
    let metadata = FeedbackMetadata::default();
    insert_feedback(
        pool,
        &NewFeedback {
            product_id,
            source: "PLAY_STORE",
            customer: &customer,
            content,
            language: "en",
            translation: "",
            release: "1.0.0",
            metadata: &metadata,
            posted_at: Utc::now() - Duration::days(1),
            translated_at: translated_minutes_ago.map(|m| Utc::now() - Duration::minutes(m)),
        },
    )
    .await
    .unwrap_or_else(|e| panic!("insert_feedback failed for '{content}': {e}"))
}

fn partial(feedback_id: Uuid, minutes_ago: i64) -> NewPartialIssue {
    NewPartialIssue {
        id: Uuid::new_v4(),
        feedback_id,
        title: "Crash".to_string(),
        description: "Crashes on launch".to_string(),
        steps: vec!["Open the app".to_string()],
        severity: "HIGH".to_string(),
        category: "STABILITY".to_string(),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

fn new_issue(product_id: Uuid, embedding: Vec<f32>) -> NewIssue {
    let stats = ClusterStats::seed(&Contribution {
        source: "PLAY_STORE".to_string(),
        label: "HIGH".to_string(),
        category: "STABILITY".to_string(),
        release: "1.0.0".to_string(),
        posted_at: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
    });
    NewIssue {
        id: Uuid::new_v4(),
        product_id,
        embedding,
        title: "Crash".to_string(),
        description: "Crashes on launch".to_string(),
        steps: vec![],
        stats,
        created_at: Utc::now(),
    }
}

async fn create_test_issue(pool: &sqlx::PgPool, issue: &NewIssue, feedback_id: Uuid) {
    let mut tx = pool.begin().await.expect("begin failed");
    create_issue(&mut tx, issue, feedback_id)
        .await
        .expect("create_issue failed");
    tx.commit().await.expect("commit failed");
}

// ---------------------------------------------------------------------------
// Section 1: Feedback
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn mark_feedback_processed_only_once(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Crashes", Some(5)).await;

    mark_feedback_processed(&pool, feedback.id, 120, Utc::now())
        .await
        .expect("first mark_feedback_processed failed");

    let fetched = get_feedback(&pool, feedback.id)
        .await
        .expect("get_feedback failed")
        .expect("feedback should exist");
    assert_eq!(fetched.tokens, 120);
    assert!(fetched.processed_at.is_some());

    let err = mark_feedback_processed(&pool, feedback.id, 50, Utc::now())
        .await
        .expect_err("second mark should fail");
    assert!(matches!(err, DbError::UnexpectedEffect { actual: 0, .. }));
}

#[sqlx::test(migrations = "../../migrations")]
async fn add_feedback_tokens_accumulates(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Slow", Some(5)).await;

    let mut tx = pool.begin().await.unwrap();
    assert_eq!(add_feedback_tokens(&mut tx, feedback.id, 10).await.unwrap(), 10);
    assert_eq!(add_feedback_tokens(&mut tx, feedback.id, 5).await.unwrap(), 15);
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let err = add_feedback_tokens(&mut tx, Uuid::new_v4(), 1)
        .await
        .expect_err("unknown feedback should fail");
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_unprocessed_feedback_ids_pages_in_translation_order(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let oldest = insert_test_feedback(&pool, product.id, "a", Some(30)).await;
    let middle = insert_test_feedback(&pool, product.id, "b", Some(20)).await;
    let newest = insert_test_feedback(&pool, product.id, "c", Some(10)).await;
    // Not translated yet: never listed.
    insert_test_feedback(&pool, product.id, "d", None).await;
    // Already processed: never listed.
    let done = insert_test_feedback(&pool, product.id, "e", Some(40)).await;
    mark_feedback_processed(&pool, done.id, 0, Utc::now())
        .await
        .unwrap();

    let first = list_unprocessed_feedback_ids(&pool, None, 2).await.unwrap();
    assert_eq!(first.items, vec![oldest.id, middle.id]);
    let next = first.next.expect("a second page should exist");
    assert_eq!(next.id, middle.id);

    let second = list_unprocessed_feedback_ids(&pool, Some(next), 2)
        .await
        .unwrap();
    assert_eq!(second.items, vec![newest.id]);
    assert!(second.next.is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn one_review_per_feedback(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Nice", Some(1)).await;

    let review = NewReview {
        id: Uuid::new_v4(),
        product_id: product.id,
        feedback_id: feedback.id,
        keywords: vec!["nice".to_string()],
        sentiment: "POSITIVE".to_string(),
        emotions: vec!["JOY".to_string()],
        intention: "RETAIN".to_string(),
        category: "UX".to_string(),
        created_at: Utc::now(),
    };
    let row = insert_review(&pool, &review).await.unwrap();
    assert!(row.quality.is_none());

    let again = NewReview {
        id: Uuid::new_v4(),
        ..review
    };
    let err = insert_review(&pool, &again).await.unwrap_err();
    assert!(err.is_unique_violation());
}

// ---------------------------------------------------------------------------
// Section 2: Partial issues
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn partial_issue_lifecycle(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Crashes", Some(1)).await;

    let partials = vec![partial(feedback.id, 3), partial(feedback.id, 2), partial(feedback.id, 1)];
    bulk_create_partial_issues(&pool, &partials).await.unwrap();
    bulk_create_partial_issues(&pool, &[]).await.unwrap();

    let fetched = get_partial_issue(&pool, partials[0].id)
        .await
        .unwrap()
        .expect("partial should exist");
    assert_eq!(fetched.steps, vec!["Open the app".to_string()]);

    let page = list_partial_issue_ids(&pool, None, 2).await.unwrap();
    assert_eq!(page.items, vec![partials[0].id, partials[1].id]);
    let rest = list_partial_issue_ids(&pool, page.next, 2).await.unwrap();
    assert_eq!(rest.items, vec![partials[2].id]);

    delete_partial_issue(&pool, partials[0].id).await.unwrap();
    let err = delete_partial_issue(&pool, partials[0].id)
        .await
        .expect_err("second delete should fail");
    assert!(matches!(err, DbError::UnexpectedEffect { actual: 0, .. }));
    assert!(get_partial_issue(&pool, partials[0].id)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn cursor_past_the_end_returns_empty_page(pool: sqlx::PgPool) {
    let far_future = Cursor {
        at: Utc::now() + Duration::days(365),
        id: Uuid::max(),
    };
    let page = list_partial_issue_ids(&pool, Some(far_future), 10)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(page.next.is_none());
}

// ---------------------------------------------------------------------------
// Section 3: Issues
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn similar_issues_are_thresholded_and_ordered(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let other_product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Crashes", Some(1)).await;
    let other_feedback = insert_test_feedback(&pool, other_product.id, "Crashes", Some(1)).await;

    let exact = new_issue(product.id, vec![1.0, 0.0, 0.0]);
    let close = new_issue(product.id, vec![1.0, 1.0, 0.0]);
    let orthogonal = new_issue(product.id, vec![0.0, 1.0, 0.0]);
    let foreign = new_issue(other_product.id, vec![1.0, 0.0, 0.0]);
    create_test_issue(&pool, &orthogonal, feedback.id).await;
    create_test_issue(&pool, &close, feedback.id).await;
    create_test_issue(&pool, &exact, feedback.id).await;
    create_test_issue(&pool, &foreign, other_feedback.id).await;

    let found = list_similar_issues(&pool, &[1.0, 0.0, 0.0], 0.6, 10, product.id)
        .await
        .unwrap();
    let ids: Vec<Uuid> = found.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![exact.id, close.id]);

    // The limit applies before the threshold.
    let top_one = list_similar_issues(&pool, &[1.0, 0.0, 0.0], 0.6, 1, product.id)
        .await
        .unwrap();
    assert_eq!(top_one.len(), 1);
    assert_eq!(top_one[0].id, exact.id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn lock_issue_fails_fast_when_held(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let feedback = insert_test_feedback(&pool, product.id, "Crashes", Some(1)).await;
    let issue = new_issue(product.id, vec![1.0, 0.0, 0.0]);
    create_test_issue(&pool, &issue, feedback.id).await;

    let mut holder = pool.begin().await.unwrap();
    let locked = lock_issue(&mut *holder, issue.id).await.unwrap();
    assert!(locked.is_some());

    let err = lock_issue(&pool, issue.id)
        .await
        .expect_err("second locker should not wait");
    assert!(err.is_lock_not_available(), "unexpected error: {err:?}");

    holder.rollback().await.unwrap();
    assert!(lock_issue(&pool, issue.id).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_aggregated_issue_rewrites_and_links(pool: sqlx::PgPool) {
    let product = insert_test_product(&pool).await;
    let first = insert_test_feedback(&pool, product.id, "Crashes", Some(1)).await;
    let second = insert_test_feedback(&pool, product.id, "Crashes too", Some(1)).await;
    let issue = new_issue(product.id, vec![1.0, 0.0, 0.0]);
    create_test_issue(&pool, &issue, first.id).await;

    let mut stats = issue.stats.clone();
    stats.absorb(
        &Contribution {
            source: "APP_STORE".to_string(),
            label: "HIGH".to_string(),
            category: "STABILITY".to_string(),
            release: "1.0.1".to_string(),
            posted_at: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
        },
        Utc::now(),
    );
    let update = IssueUpdate {
        title: "Crash at startup".to_string(),
        description: "The app crashes right after launch".to_string(),
        steps: vec!["Launch".to_string()],
        embedding: vec![0.9, 0.1, 0.0],
        stats,
    };

    let mut tx = pool.begin().await.unwrap();
    update_aggregated_issue(&mut tx, issue.id, &update, second.id)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let row = get_issue(&pool, issue.id).await.unwrap().unwrap();
    assert_eq!(row.title, "Crash at startup");
    assert_eq!(row.customers, 2);
    assert_eq!(row.priority, 6);
    assert_eq!(row.severities.0.get("HIGH"), Some(&2));
    assert_eq!(row.sources.0.get("APP_STORE"), Some(&1));
    assert!(row.last_aggregated_at.is_some());

    let links: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM issue_feedback WHERE issue_id = $1")
            .bind(issue.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(links, 2);

    // Linking the same feedback twice violates the composite primary key.
    let mut tx = pool.begin().await.unwrap();
    let err = update_aggregated_issue(&mut tx, issue.id, &update, second.id)
        .await
        .expect_err("duplicate link should fail");
    assert!(err.is_unique_violation(), "unexpected error: {err:?}");
}

// ---------------------------------------------------------------------------
// Section 4: Jobs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn unique_jobs_are_deduplicated_until_expiry(pool: sqlx::PgPool) {
    let payload = serde_json::json!({ "partial_id": Uuid::new_v4() });
    let job = NewJob {
        kind: "aggregator:aggregate-issue",
        payload: &payload,
        max_retries: 2,
        unique: Some(("key-1", Duration::hours(12))),
    };

    let first = enqueue_job(&pool, &job).await.unwrap();
    assert!(first.is_some());
    assert!(enqueue_job(&pool, &job).await.unwrap().is_none());

    sqlx::query("UPDATE job_unique_keys SET expires_at = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await
        .unwrap();
    assert!(enqueue_job(&pool, &job).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn completing_a_unique_job_releases_its_key(pool: sqlx::PgPool) {
    let payload = serde_json::json!({});
    let job = NewJob {
        kind: "aggregator:schedule-aggregate-issue",
        payload: &payload,
        max_retries: 2,
        unique: Some(("walk-issues", Duration::hours(24))),
    };

    let id = enqueue_job(&pool, &job).await.unwrap().unwrap();
    claim_job(&pool).await.unwrap().unwrap();
    assert!(
        enqueue_job(&pool, &job).await.unwrap().is_none(),
        "key is held while the job runs"
    );

    complete_job(&pool, id).await.unwrap();
    assert_eq!(get_job(&pool, id).await.unwrap().unwrap().status, "succeeded");

    let next = enqueue_job(&pool, &job).await.unwrap();
    assert!(next.is_some(), "next walk is accepted within the 24h window");
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_unique_job_keeps_its_key(pool: sqlx::PgPool) {
    let payload = serde_json::json!({ "partial_id": Uuid::new_v4() });
    let job = NewJob {
        kind: "aggregator:aggregate-issue",
        payload: &payload,
        max_retries: 0,
        unique: Some(("key-2", Duration::hours(12))),
    };

    let id = enqueue_job(&pool, &job).await.unwrap().unwrap();
    claim_job(&pool).await.unwrap().unwrap();
    fail_job(&pool, id, "gave up").await.unwrap();

    assert!(enqueue_job(&pool, &job).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn claim_retry_complete_and_fail(pool: sqlx::PgPool) {
    let payload = serde_json::json!({});
    let job = NewJob {
        kind: "processor:schedule-process-feedback",
        payload: &payload,
        max_retries: 1,
        unique: None,
    };
    let id = enqueue_job(&pool, &job).await.unwrap().unwrap();

    let claimed = claim_job(&pool).await.unwrap().expect("job should be claimable");
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.attempts, 1);
    assert!(claim_job(&pool).await.unwrap().is_none());

    retry_job(&pool, id, "engine timed out", Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert!(claim_job(&pool).await.unwrap().is_none(), "retry is not due yet");

    sqlx::query("UPDATE jobs SET run_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    let again = claim_job(&pool).await.unwrap().unwrap();
    assert_eq!(again.attempts, 2);
    assert!(again.retries_exhausted());

    fail_job(&pool, id, "gave up").await.unwrap();
    let row = get_job(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.last_error.as_deref(), Some("gave up"));

    let err = complete_job(&pool, id).await.expect_err("failed job is not running");
    assert!(matches!(err, DbError::UnexpectedEffect { .. }));
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_running_jobs_are_requeued(pool: sqlx::PgPool) {
    let payload = serde_json::json!({});
    let job = NewJob {
        kind: "processor:schedule-process-feedback",
        payload: &payload,
        max_retries: 0,
        unique: None,
    };
    let id = enqueue_job(&pool, &job).await.unwrap().unwrap();
    claim_job(&pool).await.unwrap().unwrap();

    assert_eq!(requeue_stale_jobs(&pool, Duration::minutes(10)).await.unwrap(), 0);

    sqlx::query("UPDATE jobs SET locked_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(requeue_stale_jobs(&pool, Duration::minutes(10)).await.unwrap(), 1);

    let row = get_job(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, "queued");
}

// ---------------------------------------------------------------------------
// Section 5: Breaker counters
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn breaker_counter_increments_and_expires(pool: sqlx::PgPool) {
    assert_eq!(get_breaker_failures(&pool, "engine:breaker").await.unwrap(), None);

    assert_eq!(increment_breaker_failures(&pool, "engine:breaker", 30.0).await.unwrap(), 1);
    assert_eq!(increment_breaker_failures(&pool, "engine:breaker", 30.0).await.unwrap(), 2);
    assert_eq!(get_breaker_failures(&pool, "engine:breaker").await.unwrap(), Some(2));

    sqlx::query("UPDATE breaker_counters SET expires_at = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(get_breaker_failures(&pool, "engine:breaker").await.unwrap(), None);
    assert_eq!(increment_breaker_failures(&pool, "engine:breaker", 30.0).await.unwrap(), 1);

    set_breaker_failures(&pool, "engine:breaker", 25, 60.0).await.unwrap();
    assert_eq!(get_breaker_failures(&pool, "engine:breaker").await.unwrap(), Some(25));

    delete_breaker_counter(&pool, "engine:breaker").await.unwrap();
    delete_breaker_counter(&pool, "engine:breaker").await.unwrap();
    assert_eq!(get_breaker_failures(&pool, "engine:breaker").await.unwrap(), None);
}
