//! Format classification: filename → [`FormatTag`].
//!
//! Classification looks only at the lower-cased extension. It never opens
//! the file, so it is safe to call on archive entry names before extraction
//! and gives the same answer for the same name every time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The closed set of formats the dispatcher knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Pdf,
    Word,
    Excel,
    Ppt,
    Image,
    Audio,
    Video,
    Html,
    Csv,
    Json,
    Xml,
    Unknown,
}

impl FormatTag {
    /// Every tag, in display order. `Unknown` is last.
    pub const ALL: [FormatTag; 12] = [
        FormatTag::Pdf,
        FormatTag::Word,
        FormatTag::Excel,
        FormatTag::Ppt,
        FormatTag::Image,
        FormatTag::Audio,
        FormatTag::Video,
        FormatTag::Html,
        FormatTag::Csv,
        FormatTag::Json,
        FormatTag::Xml,
        FormatTag::Unknown,
    ];

    /// Lower-case name used in URLs, JSON and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            FormatTag::Pdf => "pdf",
            FormatTag::Word => "word",
            FormatTag::Excel => "excel",
            FormatTag::Ppt => "ppt",
            FormatTag::Image => "image",
            FormatTag::Audio => "audio",
            FormatTag::Video => "video",
            FormatTag::Html => "html",
            FormatTag::Csv => "csv",
            FormatTag::Json => "json",
            FormatTag::Xml => "xml",
            FormatTag::Unknown => "unknown",
        }
    }

    /// Extensions (lower-case, no dot) that classify as this tag.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FormatTag::Pdf => &["pdf"],
            FormatTag::Word => &["doc", "docx"],
            FormatTag::Excel => &["xls", "xlsx"],
            FormatTag::Ppt => &["ppt", "pptx"],
            FormatTag::Image => &["jpg", "jpeg", "png", "gif", "bmp"],
            FormatTag::Audio => &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"],
            FormatTag::Video => &[
                "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "3gp", "mpg", "mpeg",
            ],
            FormatTag::Html => &["html", "htm"],
            FormatTag::Csv => &["csv"],
            FormatTag::Json => &["json"],
            FormatTag::Xml => &["xml"],
            FormatTag::Unknown => &[],
        }
    }

    /// Whether `filename` classifies as this tag.
    pub fn accepts(self, filename: &str) -> bool {
        self != FormatTag::Unknown && classify(filename) == self
    }

    /// Tags that have a real converter (everything except `Unknown`).
    pub fn convertible() -> impl Iterator<Item = FormatTag> {
        Self::ALL.into_iter().filter(|t| *t != FormatTag::Unknown)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = crate::error::Doc2MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        FormatTag::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| crate::error::Doc2MdError::UnknownFormat(s.to_string()))
    }
}

/// Map a filename to its format tag by extension.
///
/// Total and pure: names without an extension, with an unrecognised one
/// (including `txt`), or that are empty all yield [`FormatTag::Unknown`].
pub fn classify(filename: &str) -> FormatTag {
    let ext = match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return FormatTag::Unknown,
    };
    FormatTag::convertible()
        .find(|tag| tag.extensions().contains(&ext.as_str()))
        .unwrap_or(FormatTag::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_extensions() {
        assert_eq!(classify("report.pdf"), FormatTag::Pdf);
        assert_eq!(classify("memo.DOCX"), FormatTag::Word);
        assert_eq!(classify("legacy.doc"), FormatTag::Word);
        assert_eq!(classify("sheet.xls"), FormatTag::Excel);
        assert_eq!(classify("deck.pptx"), FormatTag::Ppt);
        assert_eq!(classify("photo.JPEG"), FormatTag::Image);
        assert_eq!(classify("song.m4a"), FormatTag::Audio);
        assert_eq!(classify("clip.3gp"), FormatTag::Video);
        assert_eq!(classify("page.htm"), FormatTag::Html);
        assert_eq!(classify("data.csv"), FormatTag::Csv);
        assert_eq!(classify("data.json"), FormatTag::Json);
        assert_eq!(classify("feed.xml"), FormatTag::Xml);
    }

    #[test]
    fn classify_unknown() {
        assert_eq!(classify("notes.txt"), FormatTag::Unknown);
        assert_eq!(classify("Makefile"), FormatTag::Unknown);
        assert_eq!(classify(""), FormatTag::Unknown);
        assert_eq!(classify(".pdf"), FormatTag::Unknown);
        assert_eq!(classify("archive.tar.gz"), FormatTag::Unknown);
    }

    #[test]
    fn classify_uses_last_extension_only() {
        assert_eq!(classify("scan.pdf.docx"), FormatTag::Word);
        assert_eq!(classify("dir/sub/a.pdf"), FormatTag::Pdf);
    }

    #[test]
    fn classify_is_deterministic() {
        for name in ["a.pdf", "b.txt", "c.MP4", "d", "e.json"] {
            assert_eq!(classify(name), classify(name));
        }
    }

    #[test]
    fn every_extension_maps_back_to_its_tag() {
        for tag in FormatTag::convertible() {
            for ext in tag.extensions() {
                assert_eq!(classify(&format!("x.{ext}")), tag, "ext {ext}");
            }
        }
    }

    #[test]
    fn parse_and_display_round_trip_names() {
        assert_eq!("PDF".parse::<FormatTag>().unwrap(), FormatTag::Pdf);
        assert_eq!(FormatTag::Excel.to_string(), "excel");
        assert!("rar".parse::<FormatTag>().is_err());
    }

    #[test]
    fn accepts_checks_extension_against_tag() {
        assert!(FormatTag::Pdf.accepts("x.pdf"));
        assert!(!FormatTag::Pdf.accepts("x.docx"));
        assert!(!FormatTag::Unknown.accepts("x.txt"));
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&FormatTag::Ppt).unwrap();
        assert_eq!(json, "\"ppt\"");
    }
}
