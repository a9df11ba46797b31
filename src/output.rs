//! Output writer: uniquely named `.md` files plus their download URLs.

use crate::error::Doc2MdError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A Markdown file written to the download directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub filename: String,
    pub download_url: String,
    pub size_bytes: u64,
}

/// Write `markdown` as `{stem}_{8 hex}.md` under `download_dir`.
///
/// The write is atomic (temp file + rename), so a reader of `download_dir`
/// never sees a partial file. `prefix` is the URL path the download route is
/// mounted on, e.g. `/download`.
pub async fn write(
    download_dir: &Path,
    source_filename: &str,
    markdown: &str,
    prefix: &str,
) -> Result<OutputFile, Doc2MdError> {
    tokio::fs::create_dir_all(download_dir)
        .await
        .map_err(|e| Doc2MdError::OutputWriteFailed {
            path: download_dir.to_path_buf(),
            source: e,
        })?;

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let filename = format!("{}_{}.md", safe_stem(source_filename), &suffix[..8]);
    let path = download_dir.join(&filename);
    let tmp_path = path.with_extension("md.tmp");

    tokio::fs::write(&tmp_path, markdown)
        .await
        .map_err(|e| Doc2MdError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Doc2MdError::OutputWriteFailed { path, source: e });
    }

    debug!("wrote {} ({} bytes)", path.display(), markdown.len());
    Ok(OutputFile {
        download_url: format!("{}/{}", prefix.trim_end_matches('/'), filename),
        size_bytes: markdown.len() as u64,
        filename,
        path,
    })
}

/// File stem with anything outside `[A-Za-z0-9._-]` (and non-ASCII letters)
/// replaced by `_`. Never empty.
fn safe_stem(source_filename: &str) -> String {
    let base = source_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_filename);
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_unique_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "report.pdf", "# A\n", "/download").await.unwrap();
        let b = write(dir.path(), "report.pdf", "# B\n", "/download/").await.unwrap();

        assert_ne!(a.filename, b.filename);
        assert!(a.filename.starts_with("report_") && a.filename.ends_with(".md"));
        assert_eq!(a.filename.len(), "report_".len() + 8 + ".md".len());
        assert_eq!(a.download_url, format!("/download/{}", a.filename));
        assert_eq!(b.download_url, format!("/download/{}", b.filename));
        assert_eq!(std::fs::read_to_string(&a.path).unwrap(), "# A\n");
        assert_eq!(a.size_bytes, 4);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn creates_missing_download_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out/md");
        let out = write(&nested, "a.csv", "x", "/download").await.unwrap();
        assert!(out.path.starts_with(&nested));
    }

    #[test]
    fn download_dir_that_is_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("downloads");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = tokio_test::block_on(write(&blocker, "a.csv", "x", "/download")).unwrap_err();
        assert!(matches!(err, Doc2MdError::OutputWriteFailed { .. }), "got {err:?}");
    }

    #[test]
    fn stems_are_sanitised() {
        assert_eq!(safe_stem("My Report (final).docx"), "My_Report__final_");
        assert_eq!(safe_stem("../../etc/passwd"), "passwd");
        assert_eq!(safe_stem("résumé.pdf"), "résumé");
        assert_eq!(safe_stem(".pdf"), "pdf");
        assert_eq!(safe_stem(".."), "document");
        assert_eq!(safe_stem(""), "document");
    }
}
