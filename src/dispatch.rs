//! Converter dispatch: route a `(file, format)` pair to exactly one converter.
//!
//! Every format tag has one [`Route`]. The route decides what happens when
//! the converter fails:
//!
//! | Route | Converter error becomes |
//! |-------|-------------------------|
//! | [`Route::Direct`] | [`ConversionOutcome::Fatal`] |
//! | [`Route::Absorbing`] | [`ConversionOutcome::Degraded`] with an error document |
//! | [`Route::WithFallback`] | secondary converter; if that fails too, `Degraded` embedding both errors |
//! | [`Route::Placeholder`] | never fails: a fixed "unsupported format" document |
//!
//! Converters run in their own Tokio task, so a panic inside one is caught
//! here and reported as `Fatal` instead of unwinding through the caller.
//! Panics and timeouts are `Fatal` on every route.

use crate::config::VisionConfig;
use crate::error::ConvertError;
use crate::format::FormatTag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A single-format Markdown converter.
///
/// Implementations only read `path`; writing output is the caller's job.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name used in logs and error documents.
    fn name(&self) -> &str;

    async fn convert(&self, path: &Path) -> Result<String, ConvertError>;
}

/// Shared handle to a converter.
pub type SharedConverter = Arc<dyn Converter>;

/// How a format tag reaches its converter and how failures are folded.
#[derive(Clone)]
pub enum Route {
    Direct(SharedConverter),
    Absorbing(SharedConverter),
    WithFallback {
        primary: SharedConverter,
        secondary: SharedConverter,
    },
    Placeholder,
}

impl Route {
    pub fn direct(c: impl Converter + 'static) -> Self {
        Route::Direct(Arc::new(c))
    }

    pub fn absorbing(c: impl Converter + 'static) -> Self {
        Route::Absorbing(Arc::new(c))
    }

    pub fn with_fallback(
        primary: impl Converter + 'static,
        secondary: impl Converter + 'static,
    ) -> Self {
        Route::WithFallback {
            primary: Arc::new(primary),
            secondary: Arc::new(secondary),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Direct(c) => write!(f, "Direct({})", c.name()),
            Route::Absorbing(c) => write!(f, "Absorbing({})", c.name()),
            Route::WithFallback { primary, secondary } => {
                write!(f, "WithFallback({} → {})", primary.name(), secondary.name())
            }
            Route::Placeholder => f.write_str("Placeholder"),
        }
    }
}

/// Result of dispatching one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Converter succeeded.
    Ok { markdown: String },
    /// Converter failed but the route produced an error document instead.
    Degraded { markdown: String, note: String },
    /// The failure escaped the route; there is no document.
    Fatal { reason: String },
}

impl ConversionOutcome {
    /// The Markdown to write, if any.
    pub fn markdown(&self) -> Option<&str> {
        match self {
            ConversionOutcome::Ok { markdown } | ConversionOutcome::Degraded { markdown, .. } => {
                Some(markdown)
            }
            ConversionOutcome::Fatal { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConversionOutcome::Fatal { .. })
    }
}

/// Format tag → route table.
#[derive(Debug, Clone, Default)]
pub struct ConverterRegistry {
    routes: HashMap<FormatTag, Route>,
}

impl ConverterRegistry {
    /// A registry with no routes; every tag resolves to [`Route::Placeholder`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in converters for every tag.
    ///
    /// PDF tries vision OCR first and falls back to the text layer; PPT,
    /// audio and video absorb their failures; everything else is direct.
    pub fn with_defaults(vision: &VisionConfig) -> Self {
        use crate::converters::{
            AudioConverter, CsvConverter, ExcelConverter, FencedTextConverter, ImageConverter,
            PdfTextConverter, PptConverter, VideoConverter, VisionPdfConverter, WordConverter,
        };

        Self::empty()
            .with_route(
                FormatTag::Pdf,
                Route::with_fallback(
                    VisionPdfConverter::new(vision.clone()),
                    PdfTextConverter::new(vision.pdfium_lib_path.clone(), vision.max_pages),
                ),
            )
            .with_route(FormatTag::Word, Route::direct(WordConverter))
            .with_route(FormatTag::Excel, Route::direct(ExcelConverter))
            .with_route(FormatTag::Ppt, Route::absorbing(PptConverter))
            .with_route(FormatTag::Image, Route::direct(ImageConverter::new(vision.clone())))
            .with_route(FormatTag::Audio, Route::absorbing(AudioConverter))
            .with_route(FormatTag::Video, Route::absorbing(VideoConverter))
            .with_route(FormatTag::Html, Route::direct(FencedTextConverter::html()))
            .with_route(FormatTag::Csv, Route::direct(CsvConverter))
            .with_route(FormatTag::Json, Route::direct(FencedTextConverter::json()))
            .with_route(FormatTag::Xml, Route::direct(FencedTextConverter::xml()))
            .with_route(FormatTag::Unknown, Route::Placeholder)
    }

    /// Replace the route for `tag`.
    pub fn with_route(mut self, tag: FormatTag, route: Route) -> Self {
        self.routes.insert(tag, route);
        self
    }

    pub fn set_route(&mut self, tag: FormatTag, route: Route) {
        self.routes.insert(tag, route);
    }

    /// The route for `tag`; unregistered tags get [`Route::Placeholder`].
    pub fn route(&self, tag: FormatTag) -> &Route {
        static PLACEHOLDER: Route = Route::Placeholder;
        self.routes.get(&tag).unwrap_or(&PLACEHOLDER)
    }
}

/// Runs converters according to a [`ConverterRegistry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConverterRegistry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: ConverterRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: None,
        }
    }

    /// Abort converters that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    /// Convert `path` according to the route registered for `tag`.
    pub async fn dispatch(&self, path: &Path, tag: FormatTag) -> ConversionOutcome {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match self.registry.route(tag) {
            Route::Placeholder => {
                debug!("{}: no converter for '{}', placeholder document", display_name, tag);
                ConversionOutcome::Ok {
                    markdown: placeholder_document(&display_name, tag),
                }
            }

            Route::Direct(converter) => match self.run(converter, path).await {
                Ok(markdown) => ConversionOutcome::Ok { markdown },
                Err(e) => {
                    error!("{}: {} failed: {}", display_name, converter.name(), e);
                    ConversionOutcome::Fatal {
                        reason: e.to_string(),
                    }
                }
            },

            Route::Absorbing(converter) => match self.run(converter, path).await {
                Ok(markdown) => ConversionOutcome::Ok { markdown },
                Err(e) if escapes_route(&e) => {
                    error!("{}: {} crashed: {}", display_name, converter.name(), e);
                    ConversionOutcome::Fatal {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    warn!("{}: {} failed, writing error document: {}", display_name, converter.name(), e);
                    ConversionOutcome::Degraded {
                        markdown: error_document(&display_name, tag, &[(converter.name(), &e)]),
                        note: e.to_string(),
                    }
                }
            },

            Route::WithFallback { primary, secondary } => {
                let first = match self.run(primary, path).await {
                    Ok(markdown) => return ConversionOutcome::Ok { markdown },
                    Err(e) => e,
                };
                warn!(
                    "{}: {} failed ({}), trying {}",
                    display_name,
                    primary.name(),
                    first,
                    secondary.name()
                );

                match self.run(secondary, path).await {
                    Ok(markdown) => ConversionOutcome::Ok { markdown },
                    Err(second) if escapes_route(&second) => {
                        error!("{}: {} crashed: {}", display_name, secondary.name(), second);
                        ConversionOutcome::Fatal {
                            reason: second.to_string(),
                        }
                    }
                    Err(second) => {
                        warn!("{}: both converters failed, writing error document", display_name);
                        ConversionOutcome::Degraded {
                            markdown: error_document(
                                &display_name,
                                tag,
                                &[(primary.name(), &first), (secondary.name(), &second)],
                            ),
                            note: format!(
                                "{}: {}; {}: {}",
                                primary.name(),
                                first,
                                secondary.name(),
                                second
                            ),
                        }
                    }
                }
            }
        }
    }

    async fn run(&self, converter: &SharedConverter, path: &Path) -> Result<String, ConvertError> {
        let converter = Arc::clone(converter);
        let owned = path.to_path_buf();
        let mut handle = tokio::spawn(async move { converter.convert(&owned).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(ConvertError::Timeout {
                        secs: limit.as_secs(),
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ConvertError::Crashed(panic_message(e.into_panic()))),
            Err(e) => Err(ConvertError::Crashed(e.to_string())),
        }
    }
}

fn escapes_route(e: &ConvertError) -> bool {
    matches!(e, ConvertError::Crashed(_) | ConvertError::Timeout { .. })
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Document returned for formats without a converter.
pub fn placeholder_document(filename: &str, tag: FormatTag) -> String {
    format!(
        "# {filename}\n\n\
         > Unsupported format (`{tag}`): no Markdown converter is available for this file type.\n"
    )
}

/// Markdown report written in place of a document whose converters failed.
pub fn error_document(filename: &str, tag: FormatTag, errors: &[(&str, &ConvertError)]) -> String {
    let mut doc = format!(
        "# Conversion error\n\n\
         **File:** `{filename}`  \n\
         **Format:** {tag}\n\n\
         The file could not be converted to Markdown.\n\n"
    );
    for (converter, err) in errors {
        doc.push_str(&format!("- **{converter}:** {err}\n"));
    }
    doc
}
