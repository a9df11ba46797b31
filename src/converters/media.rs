//! Audio and video: container detection and basic metadata.
//!
//! There is no speech-to-text here. The output is a property table built
//! from the file header (container, size and, for WAV and MP4-family files,
//! the duration). Only the first few KB are sniffed; MP4 durations come from
//! seeking through the box tree, so large members are never read whole.

use super::{display_name, human_size, markdown_table};
use crate::dispatch::Converter;
use crate::error::ConvertError;
use crate::format::FormatTag;
use async_trait::async_trait;
use infer::MatcherType;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes handed to `infer`. Matroska doc types sit a little way in.
const SNIFF_LEN: u64 = 8 * 1024;

#[derive(Debug, Default, PartialEq)]
struct MediaInfo {
    container: String,
    duration_secs: Option<f64>,
    channels: Option<u16>,
    sample_rate: Option<u32>,
}

/// Metadata table for audio files.
pub struct AudioConverter;

#[async_trait]
impl Converter for AudioConverter {
    fn name(&self) -> &str {
        "audio"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        inspect(path, FormatTag::Audio).await
    }
}

/// Metadata table for video files.
pub struct VideoConverter;

#[async_trait]
impl Converter for VideoConverter {
    fn name(&self) -> &str {
        "video"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        inspect(path, FormatTag::Video).await
    }
}

async fn inspect(path: &Path, format: FormatTag) -> Result<String, ConvertError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || inspect_blocking(&owned, format))
        .await
        .map_err(|e| ConvertError::Crashed(format!("media inspection task: {e}")))?
}

fn inspect_blocking(path: &Path, format: FormatTag) -> Result<String, ConvertError> {
    let (head, size) = read_head(path).map_err(|e| ConvertError::unreadable(path, e))?;
    if size == 0 {
        return Err(ConvertError::invalid(format, "file is empty"));
    }
    let info = match format {
        FormatTag::Video => sniff_video(path, &head),
        _ => sniff_audio(path, &head),
    }
    .ok_or_else(|| ConvertError::invalid(format, "unrecognised container"))?;

    let kind = if format == FormatTag::Video { "video" } else { "audio" };
    Ok(describe(path, size, &info, kind))
}

/// First [`SNIFF_LEN`] bytes plus the full file size.
fn read_head(path: &Path) -> io::Result<(Vec<u8>, u64)> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut head = Vec::with_capacity(SNIFF_LEN.min(size) as usize);
    file.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok((head, size))
}

fn describe(path: &Path, size: u64, info: &MediaInfo, kind: &str) -> String {
    let mut rows = vec![
        vec!["Property".to_string(), "Value".to_string()],
        vec!["Container".to_string(), info.container.clone()],
        vec!["Size".to_string(), human_size(size)],
    ];
    if let Some(secs) = info.duration_secs {
        rows.push(vec!["Duration".to_string(), format_duration(secs)]);
    }
    if let Some(channels) = info.channels {
        rows.push(vec!["Channels".to_string(), channels.to_string()]);
    }
    if let Some(rate) = info.sample_rate {
        rows.push(vec!["Sample rate".to_string(), format!("{rate} Hz")]);
    }

    format!(
        "# {}\n\n{}\n> Only {kind} metadata was extracted; the content is not transcribed.\n",
        display_name(path),
        markdown_table(&rows)
    )
}

/// `m:ss`, or `h:mm:ss` from one hour up.
fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

// ── Sniffing ─────────────────────────────────────────────────────────────

fn is_iso_bmff(kind: &infer::Type) -> bool {
    matches!(kind.extension(), "mp4" | "m4a" | "m4v" | "mov" | "3gp")
}

fn container_label(kind: &infer::Type) -> String {
    match kind.extension() {
        "mp3" => "MP3",
        "m4a" => "M4A (MPEG-4 audio)",
        "ogg" => "Ogg",
        "flac" => "FLAC",
        "wav" => "WAV",
        "aac" => "AAC (ADTS)",
        "aiff" => "AIFF",
        "amr" => "AMR",
        "mp4" => "MP4",
        "m4v" => "M4V",
        "mov" => "QuickTime",
        "mkv" => "Matroska",
        "webm" => "WebM",
        "avi" => "AVI",
        "wmv" => "WMV (ASF)",
        "flv" => "FLV",
        "mpg" => "MPEG program stream",
        other => return other.to_ascii_uppercase(),
    }
    .to_string()
}

fn sniff_audio(path: &Path, head: &[u8]) -> Option<MediaInfo> {
    let kind = infer::get(head)?;
    if kind.extension() == "wav" {
        return Some(wav_info(path));
    }
    if is_iso_bmff(&kind) {
        return Some(MediaInfo {
            container: "M4A (MPEG-4 audio)".to_string(),
            duration_secs: mp4_duration(path),
            ..MediaInfo::default()
        });
    }
    let container = match kind.matcher_type() {
        MatcherType::Audio => container_label(&kind),
        // ASF carries both; infer reports it as video.
        MatcherType::Video if kind.extension() == "wmv" => "WMA (ASF)".to_string(),
        _ => return None,
    };
    Some(MediaInfo {
        container,
        ..MediaInfo::default()
    })
}

fn sniff_video(path: &Path, head: &[u8]) -> Option<MediaInfo> {
    let kind = infer::get(head).filter(|k| k.matcher_type() == MatcherType::Video)?;
    let duration_secs = if is_iso_bmff(&kind) { mp4_duration(path) } else { None };
    Some(MediaInfo {
        container: container_label(&kind),
        duration_secs,
        ..MediaInfo::default()
    })
}

// ── Durations ────────────────────────────────────────────────────────────

/// Channels, rate and duration from the RIFF header. A WAV hound cannot
/// parse (compressed payloads) still reports its container.
fn wav_info(path: &Path) -> MediaInfo {
    let mut info = MediaInfo {
        container: "WAV".to_string(),
        ..MediaInfo::default()
    };
    if let Ok(reader) = hound::WavReader::open(path) {
        let spec = reader.spec();
        info.channels = Some(spec.channels);
        info.sample_rate = Some(spec.sample_rate);
        if spec.sample_rate > 0 {
            info.duration_secs = Some(f64::from(reader.duration()) / f64::from(spec.sample_rate));
        }
    }
    info
}

/// Body range `(start, end)` of the first `kind` box in `[start, end)`.
fn find_box<R: Read + Seek>(
    src: &mut R,
    mut pos: u64,
    end: u64,
    kind: &[u8; 4],
) -> io::Result<Option<(u64, u64)>> {
    while pos + 8 <= end {
        src.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        src.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let (header_len, size) = match size32 {
            0 => (8, end - pos),
            1 => {
                let mut large = [0u8; 8];
                src.read_exact(&mut large)?;
                (16, u64::from_be_bytes(large))
            }
            n => (8, u64::from(n)),
        };
        if size < header_len {
            return Ok(None);
        }
        let box_end = pos.saturating_add(size).min(end);
        if &header[4..8] == kind {
            return Ok(Some((pos + header_len, box_end)));
        }
        pos = box_end;
    }
    Ok(None)
}

/// Duration from `moov/mvhd`.
fn mp4_duration(path: &Path) -> Option<f64> {
    let mut file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    mvhd_duration(&mut file, len).ok().flatten()
}

fn mvhd_duration<R: Read + Seek>(src: &mut R, len: u64) -> io::Result<Option<f64>> {
    let Some((moov_start, moov_end)) = find_box(src, 0, len, b"moov")? else {
        return Ok(None);
    };
    let Some((mvhd_start, mvhd_end)) = find_box(src, moov_start, moov_end, b"mvhd")? else {
        return Ok(None);
    };

    // version 1 carries 64-bit times: 4 flags + 8 ctime + 8 mtime + 4 scale + 8 duration.
    let mut body = [0u8; 32];
    let n = ((mvhd_end - mvhd_start) as usize).min(body.len());
    src.seek(SeekFrom::Start(mvhd_start))?;
    src.read_exact(&mut body[..n])?;
    let body = &body[..n];

    let be32 = |at: usize| -> Option<u32> { Some(u32::from_be_bytes(body.get(at..at + 4)?.try_into().ok()?)) };
    let be64 = |at: usize| -> Option<u64> { Some(u64::from_be_bytes(body.get(at..at + 8)?.try_into().ok()?)) };
    let parsed = match body.first().copied() {
        Some(1) => be32(20).zip(be64(24)),
        Some(_) => be32(12).zip(be32(16).map(u64::from)),
        None => None,
    };
    Ok(parsed
        .filter(|(timescale, _)| *timescale > 0)
        .map(|(timescale, duration)| duration as f64 / f64::from(timescale)))
}
