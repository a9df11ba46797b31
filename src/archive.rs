//! ZIP archive extraction into a flat scratch directory.
//!
//! Every non-directory entry becomes one [`ArchiveMember`]. Entries are
//! written under their base filename only; directory components inside the
//! archive are discarded, so `a.pdf` and `docs/a.pdf` land side by side as
//! `a.pdf` and `a_1.pdf`. A bad entry (encrypted without a password, wrong
//! password, unreadable name, write failure) is recorded on its member and
//! extraction continues. Only a container that cannot be opened at all fails
//! the whole call.
//!
//! Extraction is blocking I/O; async callers run it under
//! `tokio::task::spawn_blocking`.

use crate::error::Doc2MdError;
use crate::format::{classify, FormatTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::ZipArchive;

/// Prefix of every scratch directory created under the work root.
pub const WORK_DIR_PREFIX: &str = "archive_extract_";

/// One entry unpacked from an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMember {
    /// De-duplicated base filename, unique within the archive.
    pub filename: String,
    /// Entry name exactly as stored in the archive.
    pub original_path: String,
    /// Where the entry was written. `None` when extraction failed.
    pub extracted_path: Option<PathBuf>,
    /// Uncompressed size from the archive directory.
    pub size_bytes: u64,
    pub format: FormatTag,
    pub is_encrypted: bool,
    /// Why this entry could not be extracted.
    pub error: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl ArchiveMember {
    /// `true` when the entry is on disk and can be converted.
    pub fn is_extracted(&self) -> bool {
        self.extracted_path.is_some() && self.error.is_none()
    }
}

/// Result of a successful (possibly partial) extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResult {
    /// Always `true` for a returned result; a corrupt container is an `Err`.
    pub success: bool,
    pub total_files: usize,
    pub extracted_files: usize,
    pub failed_files: usize,
    /// Members in archive iteration order.
    pub members: Vec<ArchiveMember>,
    /// Scratch directory holding the extracted files.
    pub work_dir: PathBuf,
}

/// Unpack `archive_path` into a fresh directory under `work_root`.
///
/// # Errors
/// * [`Doc2MdError::FileNotFound`] if the archive does not exist.
/// * [`Doc2MdError::CorruptArchive`] if it is not a readable ZIP container.
/// * [`Doc2MdError::Io`] if the scratch directory cannot be created.
pub fn extract(
    archive_path: &Path,
    password: Option<&str>,
    work_root: &Path,
) -> Result<ExtractResult, Doc2MdError> {
    let file = File::open(archive_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Doc2MdError::FileNotFound {
            path: archive_path.to_path_buf(),
        },
        _ => Doc2MdError::io(archive_path, e),
    })?;

    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| Doc2MdError::CorruptArchive {
            path: archive_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let work_dir = work_root.join(format!("{}{}", WORK_DIR_PREFIX, Uuid::new_v4().simple()));
    std::fs::create_dir_all(&work_dir).map_err(|e| Doc2MdError::io(&work_dir, e))?;
    debug!("Extracting {} into {}", archive_path.display(), work_dir.display());

    let mut members = Vec::new();
    let mut used_names: HashSet<String> = HashSet::new();

    for index in 0..archive.len() {
        let (raw_name, is_dir, is_encrypted, size_bytes) = match archive.by_index_raw(index) {
            Ok(entry) => (
                entry.name().to_string(),
                entry.is_dir(),
                entry.encrypted(),
                entry.size(),
            ),
            Err(e) => {
                warn!("Entry #{} of {} unreadable: {}", index, archive_path.display(), e);
                members.push(failed_member(
                    reserve(&format!("entry_{index}"), &mut used_names),
                    format!("entry #{index}"),
                    0,
                    false,
                    format!("unreadable entry: {e}"),
                ));
                continue;
            }
        };

        if is_dir {
            continue;
        }

        let Some(base) = base_name(&raw_name) else {
            warn!("Rejecting entry with no usable file name: {:?}", raw_name);
            members.push(failed_member(
                reserve(&raw_name, &mut used_names),
                raw_name,
                size_bytes,
                is_encrypted,
                "entry has no usable file name".to_string(),
            ));
            continue;
        };

        let filename = reserve(&base, &mut used_names);

        let target = work_dir.join(&filename);
        if target.parent() != Some(work_dir.as_path()) {
            members.push(failed_member(
                filename,
                raw_name,
                size_bytes,
                is_encrypted,
                "entry path escapes the extraction directory".to_string(),
            ));
            continue;
        }

        let outcome = if is_encrypted {
            match password {
                None => Err("entry is encrypted and no password was supplied".to_string()),
                Some(pw) => match archive.by_index_decrypt(index, pw.as_bytes()) {
                    Ok(mut entry) => write_entry(&mut entry, &target),
                    Err(zip::result::ZipError::InvalidPassword) => {
                        Err("wrong password for encrypted entry".to_string())
                    }
                    Err(e) => Err(format!("cannot decrypt entry: {e}")),
                },
            }
        } else {
            match archive.by_index(index) {
                Ok(mut entry) => write_entry(&mut entry, &target),
                Err(e) => Err(format!("cannot read entry: {e}")),
            }
        };

        match outcome {
            Ok(written) => {
                debug!("Extracted {} → {} ({} bytes)", raw_name, filename, written);
                members.push(ArchiveMember {
                    format: classify(&filename),
                    filename,
                    original_path: raw_name,
                    extracted_path: Some(target),
                    size_bytes,
                    is_encrypted,
                    error: None,
                    extracted_at: Utc::now(),
                });
            }
            Err(reason) => {
                warn!("Failed to extract {}: {}", raw_name, reason);
                members.push(failed_member(
                    filename,
                    raw_name,
                    size_bytes,
                    is_encrypted,
                    reason,
                ));
            }
        }
    }

    let extracted_files = members.iter().filter(|m| m.is_extracted()).count();
    let failed_files = members.len() - extracted_files;
    info!(
        "Extracted {}/{} entries from {} ({} failed)",
        extracted_files,
        members.len(),
        archive_path.display(),
        failed_files
    );

    Ok(ExtractResult {
        success: true,
        total_files: members.len(),
        extracted_files,
        failed_files,
        members,
        work_dir,
    })
}

/// Remove a scratch directory created by [`extract`]. Missing is not an error.
pub fn remove_work_dir(work_dir: &Path) -> Result<(), Doc2MdError> {
    match std::fs::remove_dir_all(work_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Doc2MdError::io(work_dir, e)),
    }
}

/// Claim a de-duplicated member name, failed entries included.
fn reserve(name: &str, used_names: &mut HashSet<String>) -> String {
    let filename = unique_name(name, used_names);
    used_names.insert(filename.clone());
    filename
}

fn write_entry(entry: &mut impl std::io::Read, target: &Path) -> Result<u64, String> {
    let mut out = File::create(target).map_err(|e| format!("cannot create file: {e}"))?;
    match std::io::copy(entry, &mut out) {
        Ok(n) => Ok(n),
        Err(e) => {
            drop(out);
            let _ = std::fs::remove_file(target);
            Err(format!("cannot write entry: {e}"))
        }
    }
}

fn failed_member(
    filename: String,
    original_path: String,
    size_bytes: u64,
    is_encrypted: bool,
    error: String,
) -> ArchiveMember {
    ArchiveMember {
        format: classify(&filename),
        filename,
        original_path,
        extracted_path: None,
        size_bytes,
        is_encrypted,
        error: Some(error),
        extracted_at: Utc::now(),
    }
}

/// Last normal path component of an entry name, with both `/` and `\`
/// treated as separators. `None` for names like `..` or `/`.
fn base_name(raw: &str) -> Option<String> {
    let normalised = raw.replace('\\', "/");
    let last = normalised
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .next_back()?;

    let mut components = Path::new(last).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// `name`, or `stem_N.ext` with the smallest N ≥ 1 not already used.
fn unique_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(name) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1..)
        .map(|n| match ext {
            Some(ref ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        })
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| format!("{stem}_{}", Uuid::new_v4().simple()))
}
