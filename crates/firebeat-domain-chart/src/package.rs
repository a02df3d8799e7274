use crate::info::{parse_info, InfoDocument, InfoError};
use firebeat_ports::audio::SongFile;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

/// `.dat`/`.json` entries that ship alongside difficulties but are not charts.
pub const AUXILIARY_FILES: [&str; 5] = [
    "info.dat",
    "cinema-video.json",
    "bpminfo.dat",
    "audiodata.dat",
    "lightshow.dat",
];

#[derive(thiserror::Error, Debug)]
pub enum PackageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("{0} not found in archive")]
    MissingEntry(String),
    #[error("info document: {0}")]
    Info(#[from] InfoError),
}

impl From<ZipError> for PackageError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => PackageError::Io(e.to_string()),
            other => PackageError::Archive(other.to_string()),
        }
    }
}

/// Everything one show needs out of a beatmap archive.
#[derive(Clone, Debug)]
pub struct ChartPackage {
    pub info: InfoDocument,
    pub map_file: String,
    pub map_bytes: Vec<u8>,
    pub song: SongFile,
}

impl ChartPackage {
    pub fn from_zip_path(path: &Path, map_file: &str) -> Result<Self, PackageError> {
        let file = File::open(path).map_err(|e| PackageError::Io(e.to_string()))?;
        info!(archive = %path.display(), map_file, "opening beatmap archive");
        Self::from_zip_reader(file, map_file)
    }

    /// `map_file` must name an entry exactly; there is no fallback to another
    /// difficulty.
    pub fn from_zip_reader<R: Read + Seek>(
        reader: R,
        map_file: &str,
    ) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(reader)?;
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        debug!(entries = ?names, "archive contents");

        if !names.iter().any(|name| name == map_file) {
            return Err(PackageError::MissingEntry(format!("map file {map_file:?}")));
        }
        let info_name = names
            .iter()
            .find(|name| name.eq_ignore_ascii_case("info.dat"))
            .cloned()
            .ok_or_else(|| PackageError::MissingEntry("Info.dat".to_string()))?;

        let info = parse_info(&read_entry(&mut archive, &info_name)?)?;
        if !names.iter().any(|name| *name == info.song_filename) {
            return Err(PackageError::MissingEntry(format!(
                "song file {:?}",
                info.song_filename
            )));
        }

        let map_bytes = read_entry(&mut archive, map_file)?;
        let song_bytes = read_entry(&mut archive, &info.song_filename)?;
        info!(bpm = info.bpm, song = %info.song_filename, "loaded beatmap package");

        Ok(Self {
            song: SongFile {
                filename: info.song_filename.clone(),
                bytes: Arc::new(song_bytes),
            },
            info,
            map_file: map_file.to_string(),
            map_bytes,
        })
    }
}

pub fn list_map_files_in_path(path: &Path) -> Result<Vec<String>, PackageError> {
    let file = File::open(path).map_err(|e| PackageError::Io(e.to_string()))?;
    list_map_files(file)
}

/// Candidate difficulty files, shallowest first, then by lowercase name.
pub fn list_map_files<R: Read + Seek>(reader: R) -> Result<Vec<String>, PackageError> {
    let archive = ZipArchive::new(reader)?;
    let mut maps: Vec<String> = archive
        .file_names()
        .filter(|name| name.to_ascii_lowercase().ends_with(".dat"))
        .filter(|name| !is_auxiliary(name))
        .map(str::to_string)
        .collect();
    maps.sort_by_key(|name| (name.matches('/').count(), name.to_ascii_lowercase()));
    Ok(maps)
}

fn is_auxiliary(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    AUXILIARY_FILES
        .iter()
        .any(|aux| base.eq_ignore_ascii_case(aux))
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, PackageError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(PackageError::MissingEntry(name.to_string())),
        Err(err) => return Err(err.into()),
    };
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| PackageError::Io(e.to_string()))?;
    Ok(data)
}
