// restoretool/src/retrieval/extract.rs
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;
use walkdir::WalkDir;
use which::which;

/// Archive formats backups are shipped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    SevenZip,
    TarGz,
    /// A raw backup file that needs no extraction.
    Bak,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".7z") {
            Some(ArchiveFormat::SevenZip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".bak") {
            Some(ArchiveFormat::Bak)
        } else {
            None
        }
    }
}

/// Directory an archive is extracted into: its file name without the archive
/// extension, next to the archive.
pub fn extraction_dir_for(archive_path: &Path) -> Result<PathBuf> {
    let name = archive_path
        .file_name()
        .context("Archive path has no file name")?
        .to_string_lossy()
        .to_string();
    let stem = [".tar.gz", ".tgz", ".7z"]
        .iter()
        .find_map(|ext| {
            name.len()
                .checked_sub(ext.len())
                .filter(|&cut| name.get(cut..).is_some_and(|tail| tail.eq_ignore_ascii_case(ext)))
                .map(|cut| name[..cut].to_string())
        })
        .unwrap_or(name);
    let parent = archive_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(stem))
}

/// Extracts `archive_path` and returns the single `.bak` file it contains.
pub fn extract_backup(archive_path: &Path, password: Option<&str>) -> Result<PathBuf> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "File not found for extraction: {}",
            archive_path.display()
        ));
    }

    let format = ArchiveFormat::from_path(archive_path).with_context(|| {
        format!("Unsupported backup archive format: {}", archive_path.display())
    })?;

    let extract_dir = match format {
        ArchiveFormat::Bak => return Ok(archive_path.to_path_buf()),
        ArchiveFormat::SevenZip => {
            let dir = extraction_dir_for(archive_path)?;
            extract_7z_archive(archive_path, &dir, password)?;
            dir
        }
        ArchiveFormat::TarGz => {
            let dir = extraction_dir_for(archive_path)?;
            extract_tar_gz_archive(archive_path, &dir)?;
            dir
        }
    };
    locate_backup_file(&extract_dir)
}

/// Extracts a 7z archive with the `7z` executable.
///
/// `7z` takes the password only as `-p<password>`, so it is visible in the
/// process list for the duration of the extraction.
fn extract_7z_archive(archive_path: &Path, extract_to_dir: &Path, password: Option<&str>) -> Result<()> {
    let seven_zip = which("7z").context(
        "7z executable not found in PATH. Please ensure 7-Zip is installed and in your PATH.",
    )?;
    std::fs::create_dir_all(extract_to_dir).with_context(|| {
        format!("Failed to create extraction directory: {}", extract_to_dir.display())
    })?;

    info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "Extracting 7z archive"
    );

    let mut command = Command::new(seven_zip);
    command
        .arg("x")
        .arg(archive_path)
        .arg(format!("-o{}", extract_to_dir.display()))
        .arg("-y");
    if let Some(password) = password {
        command.arg(format!("-p{}", password));
    }
    let output = command
        .output()
        .with_context(|| format!("Failed to execute 7z for {}", archive_path.display()))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "Extraction failed for {}.\nStatus: {}\nStdout: {}\nStderr: {}",
            archive_path.display(),
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    info!(archive = %archive_path.display(), "Extracted 7z archive");
    Ok(())
}

/// Extracts a GZipped TAR archive to a destination directory.
fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    if !extract_to_dir.exists() {
        std::fs::create_dir_all(extract_to_dir).with_context(|| {
            format!("Failed to create extraction directory: {}", extract_to_dir.display())
        })?;
    } else if !extract_to_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        ));
    }

    info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "Extracting tar.gz archive"
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let gz_decoder = flate2::read::GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);

    archive.unpack(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })?;
    Ok(())
}

/// Finds the one `.bak` file below `dir`. None or several is an error: the
/// engine must be pointed at an unambiguous backup image.
pub fn locate_backup_file(dir: &Path) -> Result<PathBuf> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", dir.display()))?;
        let is_bak = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bak"));
        if entry.file_type().is_file() && is_bak {
            found.push(entry.into_path());
        }
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(anyhow::anyhow!("No .bak file found in {}", dir.display())),
        n => Err(anyhow::anyhow!(
            "Expected one .bak file in {} but found {}: {:?}",
            dir.display(),
            n,
            found
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_format_detection() {
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/etoBPHC_FULL_1.7z")), Some(ArchiveFormat::SevenZip));
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/x.TAR.GZ")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/x.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/x.bak")), Some(ArchiveFormat::Bak));
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/x.zip")), None);
    }

    #[test]
    fn test_extraction_dir_strips_archive_extension() -> anyhow::Result<()> {
        assert_eq!(
            extraction_dir_for(Path::new("/b/etoBPHC_FULL_20250207.7z"))?,
            PathBuf::from("/b/etoBPHC_FULL_20250207")
        );
        assert_eq!(
            extraction_dir_for(Path::new("/b/etoBPHC_DIFF_20250208.tar.gz"))?,
            PathBuf::from("/b/etoBPHC_DIFF_20250208")
        );
        Ok(())
    }

    #[test]
    fn test_tar_gz_backup_is_extracted_and_located() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let archive_path = dir.path().join("etoBPHC_FULL_20250207.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive_path)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"TAPE header bytes";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "nested/etoBPHC_FULL_20250207.bak", &payload[..])?;
        builder.into_inner()?.finish()?;

        let bak = extract_backup(&archive_path, None)?;

        assert_eq!(
            bak,
            dir.path().join("etoBPHC_FULL_20250207").join("nested").join("etoBPHC_FULL_20250207.bak")
        );
        assert_eq!(std::fs::read(&bak)?, payload);
        Ok(())
    }

    #[test]
    fn test_raw_bak_is_used_as_is() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bak = dir.path().join("etoBPHC_DIFF_20250208.bak");
        File::create(&bak)?.write_all(b"x")?;

        assert_eq!(extract_backup(&bak, None)?, bak);
        Ok(())
    }

    #[test]
    fn test_locate_requires_exactly_one_backup() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(locate_backup_file(dir.path()).is_err());

        File::create(dir.path().join("a.bak"))?;
        File::create(dir.path().join("readme.txt"))?;
        assert_eq!(locate_backup_file(dir.path())?, dir.path().join("a.bak"));

        File::create(dir.path().join("b.BAK"))?;
        assert!(locate_backup_file(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        assert!(extract_backup(Path::new("/nonexistent/etoBPHC_FULL.7z"), None).is_err());
    }
}
