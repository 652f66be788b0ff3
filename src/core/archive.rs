/// Backup archive packing, splitting and reassembly
///
/// An archive is a zip of a staging directory:
///
/// ```text
/// manifest.json
/// .env
/// docker-compose.yml
/// db_backup.sql | db.sqlite3
/// data/...
/// ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::utils::{OpsError, MANIFEST_NAME};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Compose project the backup was taken from
    pub app: String,
    pub created_at: DateTime<Utc>,
    /// Engine name as understood by `DbEngine::from_name`
    pub engine: String,
    /// Archive member holding the database dump or file
    pub database_file: Option<String>,
    /// Compose service the database ran in, if any
    pub database_service: Option<String>,
    pub tool_version: String,
}

impl BackupManifest {
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(MANIFEST_NAME), json).context("Failed to write backup manifest")?;
        Ok(())
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_NAME);
        if !path.exists() {
            return Err(OpsError::MissingBackupMember(MANIFEST_NAME.to_string()).into());
        }
        let json = fs::read_to_string(&path).context("Failed to read backup manifest")?;
        serde_json::from_str(&json).context("Failed to parse backup manifest")
    }
}

/// Zip every file below `staging` into `dest`. Returns the archive size.
pub fn pack(staging: &Path, dest: &Path) -> Result<u64> {
    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let mut stack = vec![staging.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries: Vec<_> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .collect::<io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let name = archive_name(staging, &path)?;
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                zip.add_directory(format!("{}/", name), options)?;
                stack.push(path);
            } else if file_type.is_file() {
                zip.start_file(name, options)?;
                let mut source = BufReader::new(File::open(&path)?);
                io::copy(&mut source, &mut zip)?;
            } else {
                tracing::debug!(path = %path.display(), "skipping non-regular file");
            }
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    Ok(fs::metadata(dest)?.len())
}

fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| anyhow!("{} is outside {}", path.display(), root.display()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Extract `archive` into `dest`. Entries that would land outside `dest` are rejected.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).context("Not a valid backup archive")?;
    fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .filter(|p| p.components().all(|c| matches!(c, Component::Normal(_))))
            .ok_or_else(|| anyhow!("Unsafe path in archive: {}", entry.name()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&out_path)?);
        io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

/// Split `file` into `<file>.partNN` slices of at most `max_part` bytes.
/// A file that already fits is returned unchanged.
pub fn split(file: &Path, max_part: u64) -> Result<Vec<PathBuf>> {
    if max_part == 0 {
        return Err(anyhow!("Part size must be positive"));
    }

    let size = fs::metadata(file)?.len();
    if size <= max_part {
        return Ok(vec![file.to_path_buf()]);
    }

    let mut reader = BufReader::new(File::open(file)?);
    let mut parts = Vec::new();
    let mut index = 1;
    loop {
        let part_path = part_path(file, index);
        let mut writer = BufWriter::new(File::create(&part_path)?);
        let copied = io::copy(&mut (&mut reader).take(max_part), &mut writer)?;
        writer.flush()?;
        drop(writer);

        if copied == 0 {
            fs::remove_file(&part_path)?;
            break;
        }
        parts.push(part_path);
        index += 1;
    }

    Ok(parts)
}

fn part_path(file: &Path, index: usize) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(format!(".part{:02}", index));
    PathBuf::from(name)
}

/// Find all parts of a split archive given any path: the base archive,
/// `x.zip.part01`, or another part. A plain unsplit archive yields itself.
pub fn collect_parts(path: &Path) -> Result<Vec<PathBuf>> {
    let text = path.to_string_lossy();
    let suffix = text
        .rfind(".part")
        .map(|idx| (idx, &text[idx + 5..]))
        .filter(|(_, digits)| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));
    let base = match suffix {
        // only the names `part_path` produces
        Some((idx, digits)) if digits.parse::<usize>().map(|n| format!("{:02}", n)).as_deref() == Ok(digits) => {
            PathBuf::from(&text[..idx])
        }
        Some(_) => {
            return Err(anyhow!(
                "{} is not a backup part; split archives are named <archive>.partNN",
                path.display()
            ));
        }
        None => {
            if path.exists() {
                return Ok(vec![path.to_path_buf()]);
            }
            path.to_path_buf()
        }
    };

    let mut parts = Vec::new();
    let mut index = 1;
    loop {
        let candidate = part_path(&base, index);
        if !candidate.exists() {
            break;
        }
        parts.push(candidate);
        index += 1;
    }

    if parts.is_empty() {
        return Err(anyhow!("Backup archive not found: {}", path.display()));
    }
    Ok(parts)
}

/// Concatenate `parts` into `dest`
pub fn join(parts: &[PathBuf], dest: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(dest)?);
    for part in parts {
        let mut reader = BufReader::new(
            File::open(part).with_context(|| format!("Failed to open {}", part.display()))?,
        );
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_small_file_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.zip");
        fs::write(&file, b"tiny").unwrap();

        let parts = split(&file, 1024).unwrap();
        assert_eq!(parts, vec![file]);
    }

    #[test]
    fn test_split_collect_and_join() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.zip");
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        fs::write(&file, &payload).unwrap();

        let parts = split(&file, 1000).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].to_string_lossy().ends_with("b.zip.part01"));
        assert_eq!(fs::metadata(&parts[2]).unwrap().len(), 500);

        fs::remove_file(&file).unwrap();
        let found = collect_parts(&parts[1]).unwrap();
        assert_eq!(found, parts);
        assert_eq!(collect_parts(&file).unwrap(), parts);

        let joined = dir.path().join("joined.zip");
        join(&found, &joined).unwrap();
        assert_eq!(fs::read(&joined).unwrap(), payload);
    }

    #[test]
    fn test_split_exact_multiple_has_no_empty_part() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.zip");
        fs::write(&file, vec![7u8; 2000]).unwrap();

        let parts = split(&file, 1000).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(!part_path(&file, 3).exists());
    }

    #[test]
    fn test_collect_parts_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_parts(&dir.path().join("absent.zip")).is_err());
    }

    #[test]
    fn test_collect_parts_requires_two_digit_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.zip");
        fs::write(&file, vec![1u8; 10]).unwrap();
        split(&file, 4).unwrap();

        let from_third = collect_parts(&dir.path().join("b.zip.part03")).unwrap();
        assert_eq!(from_third.len(), 3);

        fs::write(dir.path().join("b.zip.part3"), b"x").unwrap();
        let err = collect_parts(&dir.path().join("b.zip.part3")).unwrap_err();
        assert!(err.to_string().contains(".partNN"));
        assert!(collect_parts(&dir.path().join("b.zip.part001")).is_err());
    }

    #[test]
    fn test_pack_and_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(staging.join("data").join("certs")).unwrap();
        fs::write(staging.join(".env"), "A=1\n").unwrap();
        fs::write(staging.join("data").join("certs").join("ssl.pem"), "cert").unwrap();

        let archive = dir.path().join("backup.zip");
        let size = pack(&staging, &archive).unwrap();
        assert!(size > 0);

        let zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<&str> = zip.file_names().collect();
        names.sort();
        assert_eq!(names, vec![".env", "data/", "data/certs/", "data/certs/ssl.pem"]);

        let out = dir.path().join("out");
        unpack(&archive, &out).unwrap();
        assert_eq!(fs::read_to_string(out.join(".env")).unwrap(), "A=1\n");
        assert_eq!(fs::read_to_string(out.join("data/certs/ssl.pem")).unwrap(), "cert");
    }

    #[test]
    fn test_unpack_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("../escape.txt", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }

        assert!(unpack(&archive, &dir.path().join("out")).is_err());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_manifest_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BackupManifest::read_from(dir.path()).is_err());

        let manifest = BackupManifest {
            app: "proxy-panel".to_string(),
            created_at: Utc::now(),
            engine: "mysql".to_string(),
            database_file: Some("db_backup.sql".to_string()),
            database_service: Some("mysql".to_string()),
            tool_version: "0.4.0".to_string(),
        };
        manifest.write_to(dir.path()).unwrap();
        assert_eq!(BackupManifest::read_from(dir.path()).unwrap(), manifest);
    }
}
