//! Integration tests for PgFacilityStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL, or set
//! WAITWATCH_TEST_DOCKER=1 to start a container; otherwise these tests are
//! skipped.

use chrono::{TimeZone, Utc};
use testcontainers::{ContainerAsync, GenericImage};
use waitwatch_common::{AddressParts, CanonicalEntity, Coordinate, SyncCheckpoint};
use waitwatch_store::{
    testutil::postgres_container, FacilityFilter, FacilityStore, ObservedValueUpdate,
    PgFacilityStore,
};

/// Get a migrated test store, or skip if no database is available.
async fn test_store() -> Option<(Option<ContainerAsync<GenericImage>>, PgFacilityStore)> {
    if let Ok(url) = std::env::var("DATABASE_TEST_URL") {
        let store = PgFacilityStore::connect(&url).await.ok()?;
        store.migrate().await.ok()?;
        return Some((None, store));
    }
    if std::env::var("WAITWATCH_TEST_DOCKER").is_ok() {
        let (container, store) = postgres_container().await;
        return Some((Some(container), store));
    }
    None
}

/// Per-test identifier prefix so tests sharing one database don't collide.
fn unique(id: &str) -> String {
    format!("{}-{id}", uuid::Uuid::new_v4().simple())
}

fn facility(id: &str) -> CanonicalEntity {
    CanonicalEntity::builder()
        .identifier(id)
        .name("Mercy General")
        .address(AddressParts::new("1 Main St", "Reno", "NV", "89501"))
        .coordinate(Some(Coordinate::new(39.5296, -119.8138)))
        .last_modified(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        .build()
}

#[tokio::test]
async fn upsert_twice_is_idempotent() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let id = unique("1");
    let entity = facility(&id);

    store.upsert_one(&entity).await.unwrap();
    let first = store.get(&id).await.unwrap().unwrap();
    store.upsert_batch(&[entity.clone()]).await.unwrap();
    let second = store.get(&id).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(second.coordinate, entity.coordinate);
    assert_eq!(second.name, "Mercy General");
}

#[tokio::test]
async fn null_coordinate_does_not_clobber_resolved_one() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let id = unique("1");
    store.upsert_one(&facility(&id)).await.unwrap();

    let mut renamed = facility(&id);
    renamed.name = "Mercy General Hospital".into();
    renamed.coordinate = None;
    store.upsert_one(&renamed).await.unwrap();

    let row = store.get(&id).await.unwrap().unwrap();
    assert_eq!(row.name, "Mercy General Hospital");
    assert_eq!(row.coordinate, Some(Coordinate::new(39.5296, -119.8138)));
}

#[tokio::test]
async fn sync_upsert_preserves_observed_value() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let id = unique("1");
    store.upsert_one(&facility(&id)).await.unwrap();
    let applied = store
        .apply_observed_value(&ObservedValueUpdate {
            identifier: id.clone(),
            value: "45".into(),
            has_value: true,
            is_live: true,
            at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(applied);

    store.upsert_one(&facility(&id)).await.unwrap();
    let row = store.get(&id).await.unwrap().unwrap();
    assert!(row.has_observed_value);
    assert_eq!(row.observed_value.as_deref(), Some("45"));
    assert!(row.is_live);
}

#[tokio::test]
async fn observed_value_for_missing_row_is_false() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let applied = store
        .apply_observed_value(&ObservedValueUpdate {
            identifier: unique("missing"),
            value: "10".into(),
            has_value: true,
            is_live: false,
            at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(!applied);
}

#[tokio::test]
async fn search_filter_counts_and_pages_agree() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let tag = uuid::Uuid::new_v4().simple().to_string();
    for i in 0..3 {
        let mut e = facility(&unique(&i.to_string()));
        e.name = format!("Clinic {tag} {i}");
        store.upsert_one(&e).await.unwrap();
    }

    let filter = FacilityFilter {
        search: Some(tag.to_uppercase()),
        geo: None,
    };
    assert_eq!(store.count_matching(&filter).await.unwrap(), 3);
    let page = store.fetch_page(&filter, 1, 5).await.unwrap();
    let names: Vec<_> = page.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec![format!("Clinic {tag} 1"), format!("Clinic {tag} 2")]);
}

#[tokio::test]
async fn checkpoint_round_trips() {
    let Some((_container, store)) = test_store().await else {
        return;
    };
    let job = unique("job");
    assert!(store.load_checkpoint(&job).await.unwrap().is_none());

    let checkpoint = SyncCheckpoint {
        job_name: job.clone(),
        last_run: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        progress_offset: 150,
        source_len: 4000,
    };
    store.save_checkpoint(&checkpoint).await.unwrap();
    assert_eq!(store.load_checkpoint(&job).await.unwrap(), Some(checkpoint));
}
