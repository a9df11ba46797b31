//! Configuration types for the conversion service.
//!
//! Everything the service needs at runtime lives in [`ServiceConfig`], built
//! via [`ServiceConfigBuilder`]. The vision-LLM and pdfium knobs that only
//! the PDF and image converters read are grouped in [`VisionConfig`].
//!
//! Setters clamp out-of-range values; [`ServiceConfigBuilder::build`] rejects
//! combinations that cannot work (a zero history cap, an empty download
//! prefix, and so on).

use crate::error::Doc2MdError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default upload size cap: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default number of history records kept.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// File name of the persisted batch registry inside `state_dir`.
pub const BATCH_STATE_FILE: &str = "batch_status.json";

/// File name of the persisted history log inside `state_dir`.
pub const HISTORY_FILE: &str = "history.json";

/// Configuration for the whole conversion service.
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .data_dir("/var/lib/doc2md")
///     .history_cap(50)
///     .max_concurrent_batches(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.history_cap, 50);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Where uploaded archives and single files are saved. Default: `data/uploads`.
    pub upload_dir: PathBuf,

    /// Where generated Markdown files are written. Default: `data/downloads`.
    pub download_dir: PathBuf,

    /// Root under which each extraction gets its own scratch directory.
    /// Default: the system temp directory.
    pub work_root: PathBuf,

    /// Directory holding `batch_status.json` and `history.json`.
    /// `None` keeps all state in memory. Default: `None`.
    pub state_dir: Option<PathBuf>,

    /// Maximum number of history records kept. Default: 100.
    pub history_cap: usize,

    /// Batch conversions allowed to run at the same time. Default: 2.
    ///
    /// Extra batches wait for a free slot; members inside one batch always
    /// convert one after another.
    pub max_concurrent_batches: usize,

    /// Largest accepted upload in bytes. Default: 100 MiB.
    pub max_upload_bytes: u64,

    /// URL path prefix for download links. Default: `/download`.
    pub download_prefix: String,

    /// Per-file converter timeout in seconds. `None` disables it. Default: `None`.
    pub convert_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Vision LLM and pdfium settings.
    pub vision: VisionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/uploads"),
            download_dir: PathBuf::from("data/downloads"),
            work_root: std::env::temp_dir(),
            state_dir: None,
            history_cap: DEFAULT_HISTORY_CAP,
            max_concurrent_batches: 2,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            download_prefix: "/download".to_string(),
            convert_timeout_secs: None,
            download_timeout_secs: 120,
            vision: VisionConfig::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("upload_dir", &self.upload_dir)
            .field("download_dir", &self.download_dir)
            .field("work_root", &self.work_root)
            .field("state_dir", &self.state_dir)
            .field("history_cap", &self.history_cap)
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("download_prefix", &self.download_prefix)
            .field("convert_timeout_secs", &self.convert_timeout_secs)
            .field("vision", &self.vision)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Path of the persisted batch registry, if persistence is on.
    pub fn batch_state_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(BATCH_STATE_FILE))
    }

    /// Path of the persisted history log, if persistence is on.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(HISTORY_FILE))
    }

    /// Create upload, download, work and state directories.
    pub fn ensure_dirs(&self) -> Result<(), Doc2MdError> {
        let mut dirs: Vec<&Path> = vec![&self.upload_dir, &self.download_dir, &self.work_root];
        if let Some(ref state) = self.state_dir {
            dirs.push(state);
        }
        for dir in dirs {
            std::fs::create_dir_all(dir).map_err(|e| Doc2MdError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Put uploads, downloads, scratch space and persisted state under one directory.
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.config.upload_dir = dir.join("uploads");
        self.config.download_dir = dir.join("downloads");
        self.config.work_root = dir.join("work");
        self.config.state_dir = Some(dir.to_path_buf());
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = dir.into();
        self
    }

    pub fn state_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.state_dir = dir;
        self
    }

    pub fn history_cap(mut self, n: usize) -> Self {
        self.config.history_cap = n.max(1);
        self
    }

    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        self.config.max_concurrent_batches = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn download_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.config.download_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn convert_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.convert_timeout_secs = secs.filter(|s| *s > 0);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn vision(mut self, vision: VisionConfig) -> Self {
        self.config.vision = vision;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Doc2MdError> {
        let c = &self.config;
        if c.history_cap == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "history cap must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max upload size must be > 0".into(),
            ));
        }
        if c.download_prefix.is_empty() || !c.download_prefix.starts_with('/') {
            return Err(Doc2MdError::InvalidConfig(format!(
                "download prefix must start with '/', got '{}'",
                c.download_prefix
            )));
        }
        if c.upload_dir == c.download_dir {
            return Err(Doc2MdError::InvalidConfig(
                "upload and download directories must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for the vision-LLM converters (PDF OCR and image transcription).
#[derive(Clone)]
pub struct VisionConfig {
    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the environment is consulted.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page or image. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed LLM call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest edge of a rasterised PDF page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent LLM calls per PDF. Default: 4.
    pub page_concurrency: usize,

    /// Only the first N pages of a PDF are converted. Default: all.
    pub max_pages: Option<usize>,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Directory containing the pdfium shared library. If None, the
    /// `PDFIUM_LIB_PATH` env var and then the system library are tried.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Transcribe images with the vision LLM. When off, or when no
    /// provider can be resolved, images get a metadata-only document.
    /// Default: true.
    pub image_ocr: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_rendered_pixels: 2000,
            page_concurrency: 4,
            max_pages: None,
            system_prompt: None,
            pdfium_lib_path: None,
            image_ocr: true,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page_concurrency", &self.page_concurrency)
            .field("max_pages", &self.max_pages)
            .field("image_ocr", &self.image_ocr)
            .finish()
    }
}

impl VisionConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_max_rendered_pixels(mut self, px: u32) -> Self {
        self.max_rendered_pixels = px.max(100);
        self
    }

    pub fn with_page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = n.max(1);
        self
    }

    pub fn with_max_pages(mut self, n: Option<usize>) -> Self {
        self.max_pages = n.filter(|n| *n > 0);
        self
    }

    pub fn with_pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn with_image_ocr(mut self, on: bool) -> Self {
        self.image_ocr = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.history_cap, 100);
        assert_eq!(c.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(c.download_prefix, "/download");
        assert!(c.state_dir.is_none());
        assert!(c.convert_timeout_secs.is_none());
        assert_eq!(c.vision.max_retries, 3);
    }

    #[test]
    fn data_dir_sets_all_paths() {
        let c = ServiceConfig::builder().data_dir("/srv/d2m").build().unwrap();
        assert_eq!(c.upload_dir, PathBuf::from("/srv/d2m/uploads"));
        assert_eq!(c.download_dir, PathBuf::from("/srv/d2m/downloads"));
        assert_eq!(c.work_root, PathBuf::from("/srv/d2m/work"));
        assert_eq!(
            c.history_path(),
            Some(PathBuf::from("/srv/d2m/history.json"))
        );
        assert_eq!(
            c.batch_state_path(),
            Some(PathBuf::from("/srv/d2m/batch_status.json"))
        );
    }

    #[test]
    fn setters_clamp() {
        let c = ServiceConfig::builder()
            .history_cap(0)
            .max_concurrent_batches(0)
            .convert_timeout_secs(Some(0))
            .download_prefix("/files/")
            .build()
            .unwrap();
        assert_eq!(c.history_cap, 1);
        assert_eq!(c.max_concurrent_batches, 1);
        assert!(c.convert_timeout_secs.is_none());
        assert_eq!(c.download_prefix, "/files");
    }

    #[test]
    fn build_rejects_bad_prefix() {
        let err = ServiceConfig::builder()
            .download_prefix("download")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("download prefix"));
    }

    #[test]
    fn build_rejects_same_upload_and_download_dir() {
        let err = ServiceConfig::builder()
            .upload_dir("/x")
            .download_dir("/x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::InvalidConfig(_)));
    }

    #[test]
    fn vision_setters_clamp() {
        let v = VisionConfig::default()
            .with_temperature(5.0)
            .with_max_rendered_pixels(10)
            .with_page_concurrency(0)
            .with_max_pages(Some(0));
        assert_eq!(v.temperature, 2.0);
        assert_eq!(v.max_rendered_pixels, 100);
        assert_eq!(v.page_concurrency, 1);
        assert!(v.max_pages.is_none());
    }
}
