//! Integration tests for the batch pipeline: upload → extract → convert.
//!
//! Converters are mocks registered on an empty [`ConverterRegistry`], so no
//! vision LLM or pdfium library is needed. Archives are built on the fly with
//! `zip::ZipWriter`.

use async_trait::async_trait;
use edgequake_doc2md::{
    BatchProgressCallback, BatchStatus, ConvertError, Converter, ConverterRegistry, Doc2MdError,
    Doc2MdService, FormatTag, MemberStatus, Route, ServiceConfig,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Echoes the file back under a heading. Optionally sleeps first.
struct Echo {
    delay: Duration,
}

impl Echo {
    fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    fn slow(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl Converter for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConvertError::unreadable(path, e))?;
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        Ok(format!("# {name}\n\n{body}\n"))
    }
}

/// Fails for one file name, echoes everything else.
struct FailOn(&'static str);

#[async_trait]
impl Converter for FailOn {
    fn name(&self) -> &str {
        "fail-on"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        if path.file_name().is_some_and(|n| n == self.0) {
            return Err(ConvertError::invalid(FormatTag::Pdf, "no pages"));
        }
        Echo::instant().convert(path).await
    }
}

struct Panics;

#[async_trait]
impl Converter for Panics {
    fn name(&self) -> &str {
        "panics"
    }

    async fn convert(&self, _path: &Path) -> Result<String, ConvertError> {
        panic!("converter blew up");
    }
}

fn write_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
    for (entry, data) in entries {
        if entry.ends_with('/') {
            zip.add_directory(*entry, SimpleFileOptions::default()).unwrap();
        } else {
            zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
    path
}

/// `plain.csv` in the clear plus `secret.csv` AES-encrypted with `password`.
fn write_encrypted_zip(dir: &Path, password: &str) -> PathBuf {
    let path = dir.join("locked.zip");
    let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("plain.csv", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"a,b\n1,2\n").unwrap();
    let locked = SimpleFileOptions::default().with_aes_encryption(zip::AesMode::Aes256, password);
    zip.start_file("secret.csv", locked).unwrap();
    zip.write_all(b"x,y\n3,4\n").unwrap();
    zip.finish().unwrap();
    path
}

fn service_with(dir: &Path, registry: ConverterRegistry, history_cap: usize) -> Doc2MdService {
    let config = ServiceConfig::builder()
        .data_dir(dir)
        .history_cap(history_cap)
        .build()
        .unwrap();
    Doc2MdService::with_registry(config, registry).unwrap()
}

fn echo_registry() -> ConverterRegistry {
    ConverterRegistry::empty()
        .with_route(FormatTag::Pdf, Route::direct(Echo::instant()))
        .with_route(FormatTag::Csv, Route::direct(Echo::instant()))
}

/// Upload and extract `zip`, returning the batch id.
async fn prepare(svc: &Doc2MdService, zip: &Path, password: Option<&str>) -> String {
    let bytes = std::fs::read(zip).unwrap();
    let name = zip.file_name().unwrap().to_string_lossy().into_owned();
    let receipt = svc
        .batches()
        .upload(&name, &bytes, password.map(str::to_string))
        .await
        .unwrap();
    svc.batches().extract(&receipt.batch_id).await.unwrap();
    receipt.batch_id
}

async fn convert_all(svc: &Doc2MdService, batch_id: &str) {
    svc.batches()
        .start_conversion(batch_id, None)
        .await
        .unwrap()
        .join()
        .await;
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn docs_zip_flattens_and_converts_every_member() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_zip(
        tmp.path(),
        "docs.zip",
        &[
            ("a.pdf", b"first"),
            ("dir/", b""),
            ("dir/a.pdf", b"second"),
            ("b.txt", b"plain text"),
        ],
    );

    let bytes = std::fs::read(&zip).unwrap();
    let receipt = svc.batches().upload("docs.zip", &bytes, None).await.unwrap();
    assert_eq!(receipt.archive_name, "docs.zip");
    assert_eq!(
        svc.batches().status(&receipt.batch_id).unwrap().status,
        BatchStatus::Uploaded
    );

    let summary = svc.batches().extract(&receipt.batch_id).await.unwrap();
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.extracted_files + summary.failed_files, 3);
    assert_eq!(summary.failed_files, 0);
    let names: Vec<&str> = summary.files.iter().map(|m| m.filename.as_str()).collect();
    assert_eq!(names, ["a.pdf", "a_1.pdf", "b.txt"]);
    assert_eq!(summary.files[2].format, FormatTag::Unknown);

    let handle = svc
        .batches()
        .start_conversion(&receipt.batch_id, None)
        .await
        .unwrap();
    assert_eq!(handle.total_files, 3);
    handle.join().await;

    let job = svc.batches().status(&receipt.batch_id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.conversion_progress.total, 3);
    assert_eq!(job.conversion_progress.completed, 3);
    assert_eq!(job.conversion_progress.failed, 0);
    assert_eq!(job.conversion_progress.processing, 0);
    assert!(job.finished_at.is_some());

    let second = job.member("a_1.pdf").unwrap();
    let md = std::fs::read_to_string(second.markdown_path.as_ref().unwrap()).unwrap();
    assert!(md.contains("second"));
    assert!(second.download_url.as_ref().unwrap().starts_with("/download/a_1_"));

    let txt = job.member("b.txt").unwrap();
    assert_eq!(txt.conversion_status, Some(MemberStatus::Completed));
    let placeholder = std::fs::read_to_string(txt.markdown_path.as_ref().unwrap()).unwrap();
    assert!(placeholder.contains("Unsupported format"));

    assert_eq!(svc.history().len(), 3);
}

#[tokio::test]
async fn one_failing_member_does_not_fail_the_batch() {
    let tmp = TempDir::new().unwrap();
    let registry = ConverterRegistry::empty().with_route(FormatTag::Pdf, Route::direct(FailOn("b.pdf")));
    let svc = service_with(tmp.path(), registry, 100);
    let zip = write_zip(
        tmp.path(),
        "three.zip",
        &[("a.pdf", b"1"), ("b.pdf", b"2"), ("c.pdf", b"3")],
    );

    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert!(job
        .members
        .iter()
        .all(|m| m.conversion_status.is_some_and(MemberStatus::is_terminal)));

    let failed = job.member("b.pdf").unwrap();
    assert_eq!(failed.conversion_status, Some(MemberStatus::Failed));
    assert!(failed.conversion_error.as_ref().unwrap().contains("no pages"));
    assert!(failed.markdown_path.is_none());

    assert_eq!(job.conversion_progress.completed, 2);
    assert_eq!(job.conversion_progress.failed, 1);
    assert!(job.conversion_progress.is_consistent());
    assert_eq!(svc.history().len(), 2);
}

#[tokio::test]
async fn absorbing_route_writes_error_document() {
    let tmp = TempDir::new().unwrap();
    let registry =
        ConverterRegistry::empty().with_route(FormatTag::Pdf, Route::absorbing(FailOn("b.pdf")));
    let svc = service_with(tmp.path(), registry, 100);
    let zip = write_zip(tmp.path(), "two.zip", &[("a.pdf", b"1"), ("b.pdf", b"2")]);

    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let job = svc.batches().status(&id).unwrap();
    let degraded = job.member("b.pdf").unwrap();
    assert_eq!(degraded.conversion_status, Some(MemberStatus::Completed));
    assert!(degraded.conversion_error.as_ref().unwrap().contains("no pages"));
    let md = std::fs::read_to_string(degraded.markdown_path.as_ref().unwrap()).unwrap();
    assert!(md.contains("b.pdf"));
    assert_eq!(job.conversion_progress.completed, 2);
}

#[tokio::test]
async fn panicking_converter_fails_only_its_member() {
    let tmp = TempDir::new().unwrap();
    let registry = ConverterRegistry::empty()
        .with_route(FormatTag::Pdf, Route::absorbing(Panics))
        .with_route(FormatTag::Csv, Route::direct(Echo::instant()));
    let svc = service_with(tmp.path(), registry, 100);
    let zip = write_zip(tmp.path(), "mixed.zip", &[("boom.pdf", b"x"), ("ok.csv", b"a,b\n")]);

    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    let boom = job.member("boom.pdf").unwrap();
    assert_eq!(boom.conversion_status, Some(MemberStatus::Failed));
    assert!(boom.conversion_error.as_ref().unwrap().contains("converter blew up"));
    assert_eq!(
        job.member("ok.csv").unwrap().conversion_status,
        Some(MemberStatus::Completed)
    );
}

#[tokio::test]
async fn encrypted_entry_without_password_is_a_member_error() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_encrypted_zip(tmp.path(), "hunter2");

    let id = prepare(&svc, &zip, None).await;
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Extracted);
    assert_eq!(job.total_files, 2);
    assert_eq!(job.extracted_count, 1);
    assert_eq!(job.failed_count, 1);

    let secret = job.member("secret.csv").unwrap();
    assert!(secret.member.is_encrypted);
    assert!(secret.member.extracted_path.is_none());
    assert!(secret.member.error.as_ref().unwrap().contains("password"));

    // Only the extracted member is selected by default.
    let handle = svc.batches().start_conversion(&id, None).await.unwrap();
    assert_eq!(handle.total_files, 1);
    handle.join().await;
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.member("secret.csv").unwrap().conversion_status, None);
}

#[tokio::test]
async fn encrypted_entry_with_password_extracts() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_encrypted_zip(tmp.path(), "hunter2");

    let id = prepare(&svc, &zip, Some("hunter2")).await;
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.extracted_count, 2);
    assert_eq!(job.failed_count, 0);

    convert_all(&svc, &id).await;
    let job = svc.batches().status(&id).unwrap();
    let secret = job.member("secret.csv").unwrap();
    let md = std::fs::read_to_string(secret.markdown_path.as_ref().unwrap()).unwrap();
    assert!(md.contains("x,y"));
}

#[tokio::test]
async fn wrong_password_is_a_member_error() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_encrypted_zip(tmp.path(), "hunter2");

    let id = prepare(&svc, &zip, Some("letmein")).await;
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Extracted);
    assert_eq!(job.failed_count, 1);
    assert!(job.member("secret.csv").unwrap().member.error.is_some());
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn no_convertible_members_completes_immediately() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let path = tmp.path().join("only_locked.zip");
    let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
    let locked = SimpleFileOptions::default().with_aes_encryption(zip::AesMode::Aes256, "pw");
    zip.start_file("secret.pdf", locked).unwrap();
    zip.write_all(b"hidden").unwrap();
    zip.finish().unwrap();

    let id = prepare(&svc, &path, None).await;
    let handle = svc.batches().start_conversion(&id, None).await.unwrap();
    assert_eq!(handle.total_files, 0);
    handle.join().await;

    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.conversion_progress.total, 0);
    assert!(job.conversion_progress.is_consistent());
}

#[tokio::test]
async fn progress_counters_add_up_at_every_read() {
    let tmp = TempDir::new().unwrap();
    let registry = ConverterRegistry::empty().with_route(FormatTag::Csv, Route::direct(Echo::slow(40)));
    let svc = service_with(tmp.path(), registry, 100);
    let entries: Vec<(String, &[u8])> = (0..5).map(|i| (format!("f{i}.csv"), &b"a,b\n"[..])).collect();
    let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
    let zip = write_zip(tmp.path(), "five.zip", &refs);

    let id = prepare(&svc, &zip, None).await;
    svc.batches().start_conversion(&id, None).await.unwrap();

    let mut reads = 0;
    loop {
        let job = svc.batches().status(&id).unwrap();
        let p = job.conversion_progress;
        assert!(p.is_consistent(), "inconsistent progress {p:?}");
        assert_eq!(p.total, 5);
        reads += 1;
        if job.status.is_terminal() {
            assert_eq!(job.status, BatchStatus::Completed);
            assert_eq!(p.completed, 5);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(reads > 1);
}

#[tokio::test]
async fn history_keeps_only_the_newest_records() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 2);
    let zip = write_zip(
        tmp.path(),
        "many.zip",
        &[("one.csv", b"1"), ("two.csv", b"2"), ("three.csv", b"3")],
    );

    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let history = svc.history().list();
    assert_eq!(history.len(), 2);
    let names: Vec<&str> = history.iter().map(|r| r.original_name.as_str()).collect();
    assert_eq!(names, ["three.csv", "two.csv"]);

    // Sizes describe the generated Markdown, not the one-byte sources.
    assert_eq!(history[0].file_size, "# three.csv\n\n3\n".len() as u64);
    for record in &history {
        assert_eq!(record.file_size, std::fs::metadata(&record.markdown_path).unwrap().len());
    }
}

// ── Lifecycle rules ──────────────────────────────────────────────────────────

#[tokio::test]
async fn operations_out_of_order_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_zip(tmp.path(), "one.zip", &[("a.csv", b"1")]);
    let bytes = std::fs::read(&zip).unwrap();
    let receipt = svc.batches().upload("one.zip", &bytes, None).await.unwrap();
    let id = receipt.batch_id;

    let err = svc.batches().start_conversion(&id, None).await.unwrap_err();
    assert!(matches!(err, Doc2MdError::InvalidState { .. }));
    assert!(svc.batches().cancel(&id).is_err());

    svc.batches().extract(&id).await.unwrap();
    let err = svc.batches().extract(&id).await.unwrap_err();
    assert!(matches!(err, Doc2MdError::InvalidState { .. }));

    let err = svc.batches().status("does-not-exist").unwrap_err();
    assert!(err.is_not_found());
    let err = svc.batches().extract("does-not-exist").await.unwrap_err();
    assert!(matches!(err, Doc2MdError::BatchNotFound { .. }));
}

#[tokio::test]
async fn unknown_selection_leaves_batch_untouched() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_zip(tmp.path(), "one.zip", &[("a.csv", b"1")]);
    let id = prepare(&svc, &zip, None).await;

    let err = svc
        .batches()
        .start_conversion(&id, Some(vec!["a.csv".into(), "ghost.pdf".into()]))
        .await
        .unwrap_err();
    match err {
        Doc2MdError::UnknownMembers { names, .. } => assert_eq!(names, ["ghost.pdf"]),
        other => panic!("expected UnknownMembers, got {other:?}"),
    }
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Extracted);
    assert_eq!(job.member("a.csv").unwrap().conversion_status, None);
}

#[tokio::test]
async fn explicit_selection_converts_only_named_members() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_zip(tmp.path(), "two.zip", &[("a.csv", b"1"), ("b.csv", b"2")]);
    let id = prepare(&svc, &zip, None).await;

    let handle = svc
        .batches()
        .start_conversion(&id, Some(vec!["b.csv".into(), "b.csv".into()]))
        .await
        .unwrap();
    assert_eq!(handle.total_files, 1);
    handle.join().await;

    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.member("a.csv").unwrap().conversion_status, None);
    assert_eq!(
        job.member("b.csv").unwrap().conversion_status,
        Some(MemberStatus::Completed)
    );
}

#[tokio::test]
async fn upload_rejects_non_zip_and_oversized() {
    let tmp = TempDir::new().unwrap();
    let config = ServiceConfig::builder()
        .data_dir(tmp.path())
        .max_upload_bytes(8)
        .build()
        .unwrap();
    let svc = Doc2MdService::with_registry(config, echo_registry()).unwrap();

    let err = svc.batches().upload("docs.rar", b"x", None).await.unwrap_err();
    assert!(matches!(err, Doc2MdError::UnsupportedArchive { .. }));
    let err = svc.batches().upload("big.zip", &[0u8; 9], None).await.unwrap_err();
    assert!(matches!(err, Doc2MdError::UploadTooLarge { .. }));
    assert!(svc.batches().list().is_empty());
}

#[tokio::test]
async fn corrupt_archive_marks_extract_failed() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let receipt = svc
        .batches()
        .upload("broken.zip", b"definitely not a zip", None)
        .await
        .unwrap();

    let err = svc.batches().extract(&receipt.batch_id).await.unwrap_err();
    assert!(matches!(err, Doc2MdError::CorruptArchive { .. }));
    let job = svc.batches().status(&receipt.batch_id).unwrap();
    assert_eq!(job.status, BatchStatus::ExtractFailed);
    assert!(job.error.is_some());
}

#[tokio::test]
async fn cancel_stops_after_member_in_flight() {
    let tmp = TempDir::new().unwrap();
    let registry = ConverterRegistry::empty().with_route(FormatTag::Csv, Route::direct(Echo::slow(200)));
    let svc = service_with(tmp.path(), registry, 100);
    let zip = write_zip(
        tmp.path(),
        "slow.zip",
        &[("a.csv", b"1"), ("b.csv", b"2"), ("c.csv", b"3")],
    );
    let id = prepare(&svc, &zip, None).await;

    let handle = svc.batches().start_conversion(&id, None).await.unwrap();
    // Wait for the first member to start.
    for _ in 0..200 {
        let job = svc.batches().status(&id).unwrap();
        if job.member("a.csv").unwrap().conversion_status == Some(MemberStatus::Processing) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    svc.batches().cancel(&id).unwrap();
    handle.join().await;

    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Cancelled);
    assert_eq!(
        job.member("a.csv").unwrap().conversion_status,
        Some(MemberStatus::Completed)
    );
    for name in ["b.csv", "c.csv"] {
        let m = job.member(name).unwrap();
        assert_eq!(m.conversion_status, Some(MemberStatus::Failed));
        assert_eq!(m.conversion_error.as_deref(), Some(edgequake_doc2md::batch::CANCELLED));
    }
    assert!(job.conversion_progress.is_consistent());
    assert_eq!(job.conversion_progress.failed, 2);
}

#[tokio::test]
async fn cleanup_removes_scratch_files_but_keeps_record() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(tmp.path(), echo_registry(), 100);
    let zip = write_zip(tmp.path(), "one.zip", &[("a.csv", b"1")]);
    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let job = svc.batches().status(&id).unwrap();
    let work_dir = job.work_dir.clone().unwrap();
    assert!(work_dir.exists());
    assert!(job.archive_path.exists());

    svc.batches().cleanup(&id).await.unwrap();
    assert!(!work_dir.exists());
    assert!(!job.archive_path.exists());

    let job = svc.batches().status(&id).unwrap();
    assert!(job.work_dir.is_none());
    // Generated Markdown survives cleanup.
    assert!(job.member("a.csv").unwrap().markdown_path.as_ref().unwrap().exists());
}

#[tokio::test]
async fn state_survives_a_restart() {
    let tmp = TempDir::new().unwrap();
    let zip = write_zip(tmp.path(), "keep.zip", &[("a.csv", b"1")]);

    let id = {
        let svc = service_with(tmp.path(), echo_registry(), 100);
        let id = prepare(&svc, &zip, None).await;
        convert_all(&svc, &id).await;
        id
    };

    assert!(tmp.path().join("batch_status.json").exists());
    assert!(tmp.path().join("history.json").exists());

    let svc = service_with(tmp.path(), echo_registry(), 100);
    let job = svc.batches().status(&id).unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.archive_name, "keep.zip");
    assert_eq!(svc.history().len(), 1);
    assert_eq!(svc.history().list()[0].original_name, "a.csv");
}

// ── Progress callback ────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for Recorder {
    fn on_conversion_start(&self, _batch_id: &str, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }

    fn on_member_complete(&self, _batch_id: &str, filename: &str, _index: usize, _total: usize) {
        self.events.lock().unwrap().push(format!("ok {filename}"));
    }

    fn on_member_error(&self, _batch_id: &str, filename: &str, _index: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("err {filename}"));
    }

    fn on_conversion_complete(&self, _batch_id: &str, completed: usize, failed: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {completed}/{failed}"));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_member() {
    let tmp = TempDir::new().unwrap();
    let registry = ConverterRegistry::empty().with_route(FormatTag::Pdf, Route::direct(FailOn("b.pdf")));
    let recorder = Arc::new(Recorder::default());
    let svc = service_with(tmp.path(), registry, 100).with_progress(recorder.clone());
    let zip = write_zip(tmp.path(), "two.zip", &[("a.pdf", b"1"), ("b.pdf", b"2")]);

    let id = prepare(&svc, &zip, None).await;
    convert_all(&svc, &id).await;

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events, ["start 2", "ok a.pdf", "err b.pdf", "done 1/1"]);
}
