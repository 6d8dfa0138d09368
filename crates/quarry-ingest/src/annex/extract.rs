//! Unpacking archives into a scratch directory.

use crate::{Error, Result};
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path};

/// Archive formats that can be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name.
    pub fn detect(filename: &str) -> Result<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Ok(Self::Tar)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(Error::UnsupportedArchive(filename.to_string()))
        }
    }
}

/// Unpack `archive` into `dest`, returning the `/`-separated relative paths
/// of the regular files written, in archive order. Entries that would land
/// outside `dest` are skipped. `dest` is created when missing.
pub fn extract(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Tar => extract_tar(BufReader::new(file), dest),
        ArchiveFormat::TarGz => {
            extract_tar(flate2::read::GzDecoder::new(BufReader::new(file)), dest)
        }
        ArchiveFormat::Zip => extract_zip(file, dest),
    }
}

fn extract_tar<R: io::Read>(reader: R, dest: &Path) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(rel) = relative_path(&entry.path()?) else {
            tracing::warn!("Skipping archive member with unsafe path");
            continue;
        };
        if entry.unpack_in(dest)? {
            members.push(rel);
        }
    }
    Ok(members)
}

fn extract_zip(file: File, dest: &Path) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(file)?;
    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel) = entry.enclosed_name().and_then(|p| relative_path(&p)) else {
            tracing::warn!(name = entry.name(), "Skipping archive member with unsafe path");
            continue;
        };
        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        members.push(rel);
    }
    Ok(members)
}

/// Normalise an archive member path; `None` if it is absolute or escapes.
fn relative_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Directory prefix shared by all `files`, limited to `depth` components.
///
/// When `consider` is non-empty only the leading components that fully match
/// one of its patterns are kept, so a wrapping directory is stripped only
/// when it looks like one.
pub fn leading_directory(files: &[String], depth: usize, consider: &[Regex]) -> Vec<String> {
    let mut common: Option<Vec<&str>> = None;
    for file in files {
        let mut dirs: Vec<&str> = file.split('/').collect();
        dirs.pop();
        common = Some(match common {
            None => dirs,
            Some(prev) => prev
                .iter()
                .zip(&dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
        if common.as_ref().is_some_and(|c| c.is_empty()) {
            break;
        }
    }

    let mut prefix = common.unwrap_or_default();
    prefix.truncate(depth);
    prefix
        .into_iter()
        .take_while(|dir| consider.is_empty() || consider.iter().any(|re| re.is_match(dir)))
        .map(str::to_string)
        .collect()
}
