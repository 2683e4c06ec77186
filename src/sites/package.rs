//! Pulling the song out of a downloaded beatmap package.
//!
//! Both Beat Saber and osu! packages are zip archives whose entry names are
//! not reliably cased, so every lookup here is case-insensitive.

use std::io::{Cursor, Read, Seek};
use thiserror::Error;
use zip::ZipArchive;

use crate::recording_store::casefold;

pub const BEATSABER_INFO_FILE: &str = "info.dat";
pub const BEATSABER_DEFAULT_SONG: &str = "song.egg";
pub const OSU_DEFAULT_AUDIO: &str = "audio.mp3";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Upper bound on the buffer reserved up front for an entry.
const MAX_ENTRY_PREALLOCATION: u64 = 64 << 20;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive has no entry named {0}")]
    MissingEntry(String),

    #[error("invalid manifest {name}: {reason}")]
    Manifest { name: String, reason: String },
}

/// The audio payload of a package and the name it had inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAudio {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ExtractedAudio {
    /// File suffix to give the payload on disk so decoders recognise it.
    /// `.egg` is how Beat Saber names Ogg Vorbis files.
    pub fn disk_suffix(&self) -> String {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if ext.eq_ignore_ascii_case("egg") => ".ogg".to_string(),
            Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
            _ => String::new(),
        }
    }
}

pub fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, PackageError> {
    Ok(ZipArchive::new(Cursor::new(bytes))?)
}

/// Stored name of the entry matching `name` ignoring case.
pub fn find_entry<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<String> {
    let wanted = casefold(name);
    archive
        .file_names()
        .find(|candidate| casefold(candidate) == wanted)
        .map(str::to_string)
}

/// Reads the entry matching `name` ignoring case, returning its stored name
/// and content.
pub fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<(String, Vec<u8>), PackageError> {
    let stored_name =
        find_entry(archive, name).ok_or_else(|| PackageError::MissingEntry(name.to_string()))?;
    let mut file = archive.by_name(&stored_name)?;
    let mut content = Vec::with_capacity(entry_capacity_hint(file.size()));
    file.read_to_end(&mut content)?;
    Ok((stored_name, content))
}

/// The declared size comes from the archive header and is not trusted beyond
/// a preallocation hint.
fn entry_capacity_hint(declared_size: u64) -> usize {
    usize::try_from(declared_size.min(MAX_ENTRY_PREALLOCATION)).unwrap_or(0)
}

fn beatsaber_song_filename(info: &serde_json::Value) -> Option<&str> {
    info.get("_songFilename")
        .or_else(|| info.pointer("/audio/songFilename"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Extracts the song of a Beat Saber map: `info.dat` names the song file,
/// falling back to `song.egg`.
pub fn extract_beatsaber_audio(package: &[u8]) -> Result<ExtractedAudio, PackageError> {
    let mut archive = open_archive(package)?;
    let (info_name, info_bytes) = read_entry(&mut archive, BEATSABER_INFO_FILE)?;
    let info_bytes = info_bytes.strip_prefix(UTF8_BOM).unwrap_or(&info_bytes);
    let info: serde_json::Value =
        serde_json::from_slice(info_bytes).map_err(|e| PackageError::Manifest {
            name: info_name,
            reason: e.to_string(),
        })?;

    let song = beatsaber_song_filename(&info)
        .unwrap_or(BEATSABER_DEFAULT_SONG)
        .to_string();
    let (file_name, bytes) = read_entry(&mut archive, &song)?;
    Ok(ExtractedAudio { file_name, bytes })
}

fn osu_audio_filename(difficulty: &str) -> Option<String> {
    difficulty
        .lines()
        .filter_map(|line| line.trim().strip_prefix("AudioFilename:"))
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

/// Extracts the song of an osu! beatmapset: the first `.osu` difficulty
/// names the audio file, falling back to `audio.mp3`.
pub fn extract_osu_audio(package: &[u8]) -> Result<ExtractedAudio, PackageError> {
    let mut archive = open_archive(package)?;
    let mut difficulties: Vec<String> = archive
        .file_names()
        .filter(|name| casefold(name).ends_with(".osu"))
        .map(str::to_string)
        .collect();
    difficulties.sort();

    let audio_name = match difficulties.first() {
        Some(difficulty) => {
            let (_, content) = read_entry(&mut archive, difficulty)?;
            osu_audio_filename(&String::from_utf8_lossy(&content))
        }
        None => None,
    }
    .unwrap_or_else(|| OSU_DEFAULT_AUDIO.to_string());

    let (file_name, bytes) = read_entry(&mut archive, &audio_name)?;
    Ok(ExtractedAudio { file_name, bytes })
}
