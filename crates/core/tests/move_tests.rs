mod common;

use std::fs;

use chrono::Local;
use common::Fixture;
use vault_core::hash::sha256_file;
use vault_core::quarantine::QuarantineReason;
use vault_core::{Error, FileStatus, MoveStatus};

#[test]
fn new_file_is_moved_verified_and_indexed() {
    let fx = Fixture::new();
    let src = fx.write("inbox/a.txt", b"0123456789");
    let dst = fx.path("vault/a.txt");
    let before = sha256_file(&src).unwrap();

    let result = fx.mover().move_file(&src, &dst, None).unwrap();
    assert!(result.success);
    assert!(!result.is_duplicate);
    assert!(!result.is_quarantined);
    assert_eq!(result.actual_destination.as_deref(), Some(dst.as_path()));
    assert!(!src.exists());
    assert_eq!(sha256_file(&dst).unwrap(), before);

    let op = result.operation.unwrap();
    assert_eq!(op.status, MoveStatus::Completed);
    assert!(op.completed_at.is_some());
    let row = fx.index.get_by_path(&dst).unwrap().unwrap();
    assert_eq!(row.status, FileStatus::Processed);
    assert_eq!(row.checksum, before);
    assert_eq!(fx.index.canonical_for(&before).unwrap().unwrap().file_path, dst);
}

#[test]
fn ingested_source_row_follows_the_file() {
    let fx = Fixture::new();
    let src = fx.write("inbox/a.txt", b"tracked");
    fx.ingestor().ingest_file(&src).unwrap();
    let dst = fx.path("vault/2024/01/a.txt");

    let result = fx.mover().move_file(&src, &dst, None).unwrap();
    assert!(result.success);
    assert!(fx.index.get_by_path(&src).unwrap().is_none());
    assert!(fx.index.get_by_path(&dst).unwrap().is_some());
    assert_eq!(fx.index.count_files().unwrap(), 1);
}

#[test]
fn known_content_goes_to_the_duplicates_tree() {
    let fx = Fixture::new();
    let original = fx.write("vault/original.jpg", b"same picture");
    fx.ingestor().ingest_file(&original).unwrap();
    let src = fx.write("inbox/copy.jpg", b"same picture");
    let checksum = sha256_file(&src).unwrap();

    let result = fx
        .mover()
        .move_file(&src, &fx.path("vault/copy.jpg"), None)
        .unwrap();
    assert!(result.success);
    assert!(result.is_duplicate);
    assert!(!src.exists());
    assert!(!fx.path("vault/copy.jpg").exists());
    assert_eq!(fs::read(&original).unwrap(), b"same picture");

    let day = Local::now().format("%Y-%m-%d").to_string();
    let parked = fx
        .path("vault/duplicates")
        .join(day)
        .join(&checksum[..4])
        .join("copy.jpg");
    assert_eq!(result.actual_destination.as_deref(), Some(parked.as_path()));
    assert!(parked.is_file());

    let record = result.duplicate.unwrap();
    assert_eq!(record.original_path, original);
    assert_eq!(record.file_hash, checksum);
    assert_eq!(fx.index.count_duplicate_records().unwrap(), 1);
}

#[test]
fn edited_original_no_longer_claims_its_old_bytes() {
    let fx = Fixture::new();
    let original = fx.write("vault/a.txt", b"content X");
    fx.ingestor().ingest_file(&original).unwrap();
    fs::write(&original, b"content Y, edited").unwrap();
    fx.ingestor().ingest_file(&original).unwrap();

    let src = fx.write("inbox/b.txt", b"content X");
    let dst = fx.path("vault/b.txt");
    let result = fx.mover().move_file(&src, &dst, None).unwrap();
    assert!(result.success);
    assert!(!result.is_duplicate);
    assert_eq!(fs::read(&dst).unwrap(), b"content X");
    assert_eq!(fs::read(&original).unwrap(), b"content Y, edited");
    let checksum = sha256_file(&dst).unwrap();
    assert_eq!(fx.index.canonical_for(&checksum).unwrap().unwrap().file_path, dst);
}

#[test]
fn missing_source_is_rejected_without_side_effects() {
    let fx = Fixture::new();
    let err = fx
        .mover()
        .move_file(&fx.path("inbox/nope.txt"), &fx.path("vault/sub/nope.txt"), None)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!fx.path("vault/sub").exists());
    assert!(!fx.path("vault/quarantine").exists());
}

#[test]
fn same_source_and_destination_is_invalid() {
    let fx = Fixture::new();
    let src = fx.write("inbox/a.txt", b"a");
    let err = fx.mover().move_file(&src, &src, None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(src.is_file());
}

#[test]
fn occupied_destination_quarantines_and_retry_recovers() {
    let fx = Fixture::new();
    let src = fx.write("inbox/a.txt", b"incoming");
    let blocker = fx.write("vault/a.txt", b"already here");
    let mover = fx.mover();

    let result = mover.move_file(&src, &blocker, None).unwrap();
    assert!(!result.success);
    assert!(result.is_quarantined);
    assert!(result.error.is_some());
    assert_eq!(result.operation.as_ref().unwrap().status, MoveStatus::Quarantined);
    assert_eq!(fs::read(&blocker).unwrap(), b"already here");
    assert!(!src.exists());

    let record = result.quarantine.unwrap();
    assert_eq!(record.error_type, QuarantineReason::DestinationExists);
    assert!(record.can_retry);
    assert_eq!(record.original_path, src);
    assert_eq!(record.intended_destination, blocker);
    assert!(record
        .file_path
        .starts_with(fx.path("vault/quarantine/destination_exists")));
    assert!(record.sidecar_path.is_file());

    let listed = mover.quarantine().list_quarantined_files(None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].quarantine_id, record.quarantine_id);

    fs::remove_file(&blocker).unwrap();
    let retried = mover.retry_quarantined(&listed[0]).unwrap();
    assert!(retried.success);
    assert_eq!(fs::read(&blocker).unwrap(), b"incoming");
    assert!(!record.file_path.exists());
    assert!(!record.sidecar_path.exists());
    assert!(mover.quarantine().list_quarantined_files(None).unwrap().is_empty());
    assert_eq!(
        fx.index.get_by_path(&blocker).unwrap().unwrap().status,
        FileStatus::Processed
    );
}

#[test]
fn preview_reports_without_touching_anything() {
    let fx = Fixture::new();
    let original = fx.write("vault/original.txt", b"known bytes");
    fx.ingestor().ingest_file(&original).unwrap();
    let src = fx.write("inbox/again.txt", b"known bytes");
    let dst = fx.path("vault/new/again.txt");
    let files_before = fx.index.count_files().unwrap();

    let preview = fx.mover().preview_move(&src, &dst).unwrap();
    assert!(preview.source_exists);
    assert_eq!(preview.file_size, Some(11));
    assert!(preview.likely_duplicate);
    assert_eq!(preview.duplicate_of.as_deref(), Some(original.as_path()));
    assert!(!preview.destination_exists);
    assert!(preview.destination_writable);
    assert!(preview.would_succeed);

    assert!(src.is_file());
    assert!(!fx.path("vault/new").exists());
    assert!(!fx.path("vault/duplicates").exists());
    assert_eq!(fx.index.count_files().unwrap(), files_before);
}

#[test]
fn preview_flags_problems() {
    let fx = Fixture::new();
    let mover = fx.mover();

    let missing = mover
        .preview_move(&fx.path("inbox/none.txt"), &fx.path("vault/none.txt"))
        .unwrap();
    assert!(!missing.source_exists);
    assert!(!missing.would_succeed);
    assert!(!missing.warnings.is_empty());

    let src = fx.write("inbox/a.txt", b"fresh");
    let taken = fx.write("vault/a.txt", b"other");
    let blocked = mover.preview_move(&src, &taken).unwrap();
    assert!(blocked.destination_exists);
    assert!(!blocked.likely_duplicate);
    assert!(!blocked.would_succeed);
}
