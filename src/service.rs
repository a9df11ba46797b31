//! Service facade: one object wiring config, dispatch, history and batches.
//!
//! The HTTP server and the CLI both build a [`Doc2MdService`]; embedders can
//! do the same, or assemble the pieces themselves.

use crate::batch::{BatchOrchestrator, BatchStore, JsonFileBatchStore, MemoryBatchStore};
use crate::config::ServiceConfig;
use crate::dispatch::{ConversionOutcome, ConverterRegistry, Dispatcher};
use crate::error::Doc2MdError;
use crate::format::{classify, FormatTag};
use crate::history::{HistoryRecorder, HistoryRecord};
use crate::output;
use crate::pipeline::input::resolve_input;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A single file stored by [`Doc2MdService::upload_single`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleUpload {
    pub file_id: String,
    pub original_name: String,
    pub file_size: u64,
}

/// Result of [`Doc2MdService::convert_single`].
#[derive(Debug, Clone, PartialEq)]
pub struct SingleConversion {
    pub original_name: String,
    pub markdown_path: PathBuf,
    pub filename: String,
    pub download_url: String,
    pub history_id: String,
    /// `Ok` or `Degraded`; a fatal outcome is returned as an error instead.
    pub outcome: ConversionOutcome,
}

/// Result of [`convert_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedDocument {
    pub name: String,
    pub format: FormatTag,
    pub markdown: String,
    /// Set when the route absorbed a converter failure.
    pub note: Option<String>,
}

/// Everything the upload → convert → download workflow needs.
#[derive(Clone)]
pub struct Doc2MdService {
    config: Arc<ServiceConfig>,
    dispatcher: Dispatcher,
    history: Arc<HistoryRecorder>,
    batches: BatchOrchestrator,
}

impl Doc2MdService {
    /// Service with the built-in converters.
    pub fn new(config: ServiceConfig) -> Result<Self, Doc2MdError> {
        let registry = ConverterRegistry::with_defaults(&config.vision);
        Self::with_registry(config, registry)
    }

    /// Service with a caller-supplied converter table.
    ///
    /// Creates the working directories and, when `state_dir` is set, loads
    /// `batch_status.json` and `history.json` from it.
    pub fn with_registry(
        config: ServiceConfig,
        registry: ConverterRegistry,
    ) -> Result<Self, Doc2MdError> {
        config.ensure_dirs()?;

        let dispatcher = Dispatcher::new(registry)
            .with_timeout(config.convert_timeout_secs.map(Duration::from_secs));
        let history = Arc::new(match config.history_path() {
            Some(path) => HistoryRecorder::open(path, config.history_cap),
            None => HistoryRecorder::in_memory(config.history_cap),
        });
        let store: Arc<dyn BatchStore> = match config.batch_state_path() {
            Some(path) => Arc::new(JsonFileBatchStore::open(path)?),
            None => Arc::new(MemoryBatchStore::new()),
        };

        let config = Arc::new(config);
        let batches = BatchOrchestrator::new(
            Arc::clone(&config),
            dispatcher.clone(),
            Arc::clone(&history),
            store,
        );
        Ok(Self {
            config,
            dispatcher,
            history,
            batches,
        })
    }

    /// Forward batch worker events to `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.batches = self.batches.with_progress(callback);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn batches(&self) -> &BatchOrchestrator {
        &self.batches
    }

    // ── Single-file flow ─────────────────────────────────────────────────

    /// Store one uploaded file as `uploads/{file_id}_{name}`.
    ///
    /// # Errors
    /// `format` is `unknown`, `filename` does not carry one of its
    /// extensions, or the upload is over `max_upload_bytes`.
    pub async fn upload_single(
        &self,
        format: FormatTag,
        filename: &str,
        bytes: &[u8],
    ) -> Result<SingleUpload, Doc2MdError> {
        let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
        check_format(format, name)?;
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(Doc2MdError::UploadTooLarge {
                name: name.to_string(),
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let upload_dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|e| Doc2MdError::io(upload_dir, e))?;
        let file_id = uuid::Uuid::new_v4().simple().to_string();
        let path = upload_dir.join(format!("{file_id}_{name}"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Doc2MdError::io(&path, e))?;
        info!("upload {}: '{}' as {} ({} bytes)", file_id, name, format, size);

        Ok(SingleUpload {
            file_id,
            original_name: name.to_string(),
            file_size: size,
        })
    }

    /// Convert a file stored by [`Self::upload_single`].
    ///
    /// On success the Markdown is written to the download directory, the
    /// upload is deleted and a history record is added. A fatal outcome is
    /// returned as [`Doc2MdError::ConversionFailed`] and the upload is kept.
    pub async fn convert_single(
        &self,
        format: FormatTag,
        file_id: &str,
    ) -> Result<SingleConversion, Doc2MdError> {
        let (path, original_name) = self.find_upload(file_id).await?;
        check_format(format, &original_name)?;

        let outcome = self.dispatcher.dispatch(&path, format).await;
        let Some(markdown) = outcome.markdown() else {
            let reason = match &outcome {
                ConversionOutcome::Fatal { reason } => reason.clone(),
                _ => String::new(),
            };
            return Err(Doc2MdError::ConversionFailed {
                name: original_name,
                reason,
            });
        };

        let written = output::write(
            &self.config.download_dir,
            &original_name,
            markdown,
            &self.config.download_prefix,
        )
        .await?;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("could not remove upload {}: {}", path.display(), e);
        }
        let record: HistoryRecord = self.history.record(
            &original_name,
            format,
            written.size_bytes,
            &written.path,
            &written.download_url,
        );
        info!("converted '{}' → {}", original_name, written.filename);

        Ok(SingleConversion {
            original_name,
            markdown_path: written.path,
            filename: written.filename,
            download_url: written.download_url,
            history_id: record.id,
            outcome,
        })
    }

    /// `uploads/{file_id}_*` → (path, original name).
    async fn find_upload(&self, file_id: &str) -> Result<(PathBuf, String), Doc2MdError> {
        let not_found = || Doc2MdError::UploadNotFound {
            file_id: file_id.to_string(),
        };
        if file_id.len() != 32 || !file_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(not_found());
        }

        let prefix = format!("{file_id}_");
        let upload_dir = &self.config.upload_dir;
        let mut entries = match tokio::fs::read_dir(upload_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(Doc2MdError::io(upload_dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Doc2MdError::io(upload_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(original) = name.strip_prefix(&prefix) {
                return Ok((entry.path(), original.to_string()));
            }
        }
        Err(not_found())
    }
}

fn check_format(format: FormatTag, name: &str) -> Result<(), Doc2MdError> {
    if format == FormatTag::Unknown {
        return Err(Doc2MdError::UnknownFormat(format.to_string()));
    }
    if name.is_empty() {
        return Err(Doc2MdError::InvalidInput {
            input: name.to_string(),
        });
    }
    if !format.accepts(name) {
        return Err(Doc2MdError::FormatMismatch {
            name: name.to_string(),
            format,
            expected: format.extensions().join(", "),
        });
    }
    Ok(())
}

/// Convert one local file or HTTP(S) URL without touching history.
///
/// The format comes from the file name. Absorbed failures come back as a
/// document with `note` set; a fatal one is an error.
pub async fn convert_document(
    input: &str,
    dispatcher: &Dispatcher,
    download_timeout_secs: u64,
) -> Result<ConvertedDocument, Doc2MdError> {
    let resolved = resolve_input(input, download_timeout_secs).await?;
    let name = resolved.file_name();
    let format = classify(&name);
    info!("converting '{}' as {}", name, format);

    match dispatcher.dispatch(resolved.path(), format).await {
        ConversionOutcome::Ok { markdown } => Ok(ConvertedDocument {
            name,
            format,
            markdown,
            note: None,
        }),
        ConversionOutcome::Degraded { markdown, note } => Ok(ConvertedDocument {
            name,
            format,
            markdown,
            note: Some(note),
        }),
        ConversionOutcome::Fatal { reason } => Err(Doc2MdError::ConversionFailed { name, reason }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Route;
    use crate::error::ConvertError;
    use async_trait::async_trait;
    use std::path::Path;

    struct Upper;

    #[async_trait]
    impl crate::dispatch::Converter for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConvertError::unreadable(path, e))?;
            if text.is_empty() {
                return Err(ConvertError::invalid(FormatTag::Csv, "no rows"));
            }
            Ok(text.to_uppercase())
        }
    }

    fn service(dir: &Path) -> Doc2MdService {
        let config = ServiceConfig::builder().data_dir(dir).build().unwrap();
        let registry = ConverterRegistry::empty().with_route(FormatTag::Csv, Route::direct(Upper));
        Doc2MdService::with_registry(config, registry).unwrap()
    }

    #[tokio::test]
    async fn single_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let up = svc.upload_single(FormatTag::Csv, "people.csv", b"a,b\n").await.unwrap();
        assert_eq!(up.original_name, "people.csv");
        assert_eq!(up.file_size, 4);

        let done = svc.convert_single(FormatTag::Csv, &up.file_id).await.unwrap();
        assert_eq!(std::fs::read_to_string(&done.markdown_path).unwrap(), "A,B\n");
        assert!(done.download_url.starts_with("/download/people_"));
        assert_eq!(svc.history().get(&done.history_id).unwrap().original_name, "people.csv");

        let again = svc.convert_single(FormatTag::Csv, &up.file_id).await.unwrap_err();
        assert!(again.is_not_found());
    }

    #[tokio::test]
    async fn format_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let err = svc.upload_single(FormatTag::Pdf, "notes.txt", b"x").await.unwrap_err();
        assert!(matches!(err, Doc2MdError::FormatMismatch { .. }));
        let err = svc.upload_single(FormatTag::Unknown, "notes.txt", b"x").await.unwrap_err();
        assert!(matches!(err, Doc2MdError::UnknownFormat(_)));
    }

    #[tokio::test]
    async fn fatal_conversion_keeps_upload() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let up = svc.upload_single(FormatTag::Csv, "empty.csv", b"").await.unwrap();

        let err = svc.convert_single(FormatTag::Csv, &up.file_id).await.unwrap_err();
        assert!(matches!(err, Doc2MdError::ConversionFailed { .. }));
        assert!(svc.history().is_empty());
        assert!(svc.find_upload(&up.file_id).await.is_ok());
    }

    #[tokio::test]
    async fn bogus_file_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        for id in ["../../etc/passwd", "", "0123456789abcdef0123456789abcdef"] {
            let err = svc.convert_single(FormatTag::Csv, id).await.unwrap_err();
            assert!(err.is_not_found(), "{id}: {err}");
        }
    }

    #[tokio::test]
    async fn convert_document_classifies_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "x,y\n").unwrap();
        let dispatcher =
            Dispatcher::new(ConverterRegistry::empty().with_route(FormatTag::Csv, Route::direct(Upper)));

        let doc = convert_document(path.to_str().unwrap(), &dispatcher, 5).await.unwrap();
        assert_eq!(doc.format, FormatTag::Csv);
        assert_eq!(doc.markdown, "X,Y\n");

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hi").unwrap();
        let doc = convert_document(txt.to_str().unwrap(), &dispatcher, 5).await.unwrap();
        assert_eq!(doc.format, FormatTag::Unknown);
        assert!(doc.markdown.contains("Unsupported format"));
    }
}
