//! Integration tests for the SQLite record store.
//!
//! Tests cover:
//! - Inserting records and reading them back by id and in bulk
//! - Partial updates of name and test type
//! - Deleting records, and errors for unknown ids
//! - Reopening a database file

mod common;

use common::*;
use deeptest::core::config::ThresholdConfig;
use deeptest::Label;

#[tokio::test]
async fn test_insert_and_get_record() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    // 1. Insert record
    let id = db.insert(make_new_record("Patient A", 61.5)).await?;
    assert!(id > 0);

    // 2. Read it back
    let record = db.get(id).await?.expect("record should exist");
    assert_eq!(record.id, id);
    assert_eq!(record.name, "Patient A");
    assert_eq!(record.image_ref, "/photos/strip.jpg");
    assert_eq!(record.test_type, TestType::Scrape);
    assert_eq!(record.model_selection, ModelSelection::Ensemble);
    assert_eq!(record.probability, 61.5);
    assert_eq!(record.uncertainty, 2.5);

    // 3. Timestamp is set by the store
    let age = time::OffsetDateTime::now_utc() - record.timestamp;
    assert!(age.whole_minutes().abs() < 5);

    Ok(())
}

#[tokio::test]
async fn test_get_unknown_id_returns_none() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    assert!(db.get(42).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_get_all_returns_records_in_insert_order() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    assert!(db.get_all().await?.is_empty());

    let first = db.insert(make_new_record("First", 10.0)).await?;
    let second = db.insert(make_new_record("Second", 90.0)).await?;

    let records = db.get_all().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first);
    assert_eq!(records[1].id, second);
    assert_eq!(records[1].name, "Second");

    Ok(())
}

#[tokio::test]
async fn test_update_changes_only_given_fields() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let id = db.insert(make_new_record("Before", 50.0)).await?;

    // 1. Rename only
    let update = RecordUpdate {
        name: Some("After".to_string()),
        ..Default::default()
    };
    let record = db.update(id, &update).await?;
    assert_eq!(record.name, "After");
    assert_eq!(record.test_type, TestType::Scrape);

    // 2. Change test type only
    let update = RecordUpdate {
        test_type: Some(TestType::Swab),
        ..Default::default()
    };
    let record = db.update(id, &update).await?;
    assert_eq!(record.name, "After");
    assert_eq!(record.test_type, TestType::Swab);

    // 3. Result fields are untouched
    assert_eq!(record.probability, 50.0);
    assert_eq!(record.model_selection, ModelSelection::Ensemble);

    Ok(())
}

#[tokio::test]
async fn test_update_unknown_id_fails() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let update = RecordUpdate {
        name: Some("Nobody".to_string()),
        ..Default::default()
    };
    assert!(db.update(7, &update).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_delete_record() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let keep = db.insert(make_new_record("Keep", 20.0)).await?;
    let gone = db.insert(make_new_record("Gone", 30.0)).await?;

    db.delete(gone).await?;

    assert!(db.get(gone).await?.is_none());
    let records = db.get_all().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, keep);

    // deleting twice is an error
    assert!(db.delete(gone).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_records_survive_reopen() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("nested").join("results.db");

    let db = RecordDb::open(&path).await?;
    let id = db.insert(make_new_record("Persistent", 75.0)).await?;
    db.close().await;

    let db = RecordDb::open(&path).await?;
    let record = db.get(id).await?.expect("record should survive reopen");
    assert_eq!(record.name, "Persistent");
    db.close().await;

    Ok(())
}

#[tokio::test]
async fn test_record_label_uses_selection_threshold() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let thresholds = ThresholdConfig::default();

    let at_threshold = db.insert(make_new_record("Edge", 53.0)).await?;
    let below = db.insert(make_new_record("Below", 52.0)).await?;

    let record = db.get(at_threshold).await?.expect("record should exist");
    assert_eq!(record.label(&thresholds), Label::Positive);
    let record = db.get(below).await?.expect("record should exist");
    assert_eq!(record.label(&thresholds), Label::Negative);

    Ok(())
}

#[tokio::test]
async fn test_pipeline_writes_to_sqlite_store() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let image = create_test_image(60, 40);
    let work_dir = tempfile::TempDir::new()?;
    let loader = std::sync::Arc::new(FakeLoader::new(full_frame_box(60, 40), 1.0, 0.0));
    let pipeline = Pipeline::new(loader, db.clone(), FailingEnhancer).with_work_dir(work_dir.path());

    let outcome = pipeline
        .run(
            make_request(image.path(), ModelSelection::Model1),
            &mut ProgressLog::default(),
            &CancelToken::new(),
        )
        .await?;

    let stored = db.get(outcome.record_id).await?.expect("record should exist");
    assert_eq!(stored.probability, outcome.record.probability);
    assert_eq!(stored.model_selection, ModelSelection::Model1);
    assert_eq!(stored.test_type, TestType::Swab);

    Ok(())
}
