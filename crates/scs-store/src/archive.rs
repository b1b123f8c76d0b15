use crate::StoreError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, Read};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether a file starts with the gzip magic bytes.
pub fn is_gzip(path: &Path) -> Result<bool, StoreError> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}

/// Build a deterministic tar stream from a directory.
///
/// Regular files, directories and symlinks are included; other file types
/// are skipped with a warning. Entries are sorted by relative path and
/// carry mtime 0 and ownership 0:0, so equal trees yield equal bytes.
pub fn pack_tar(source_dir: &Path) -> Result<Vec<u8>, StoreError> {
    let mut entries = collect_entries(source_dir, source_dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);

    for (rel_path, full_path) in &entries {
        let ft = full_path.symlink_metadata()?.file_type();
        if ft.is_file() {
            let data = fs::read(full_path)?;
            let mut header = make_header(full_path, tar::EntryType::Regular)?;
            header.set_size(data.len() as u64);
            header.set_cksum();
            ar.append_data(&mut header, rel_path, data.as_slice())?;
        } else if ft.is_dir() {
            let mut header = make_header(full_path, tar::EntryType::Directory)?;
            header.set_size(0);
            header.set_cksum();
            ar.append_data(&mut header, format!("{rel_path}/"), std::io::empty())?;
        } else if ft.is_symlink() {
            let target = fs::read_link(full_path)?;
            let mut header = make_header(full_path, tar::EntryType::Symlink)?;
            header.set_size(0);
            header.set_cksum();
            ar.append_link(&mut header, rel_path, &target)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }

    Ok(ar.into_inner()?)
}

/// Pack a directory into a gzip-compressed tarball at `dest`.
pub fn pack_archive(source_dir: &Path, dest: &Path) -> Result<(), StoreError> {
    let tar_data = pack_tar(source_dir)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    std::io::Write::write_all(&mut encoder, &tar_data)?;
    encoder.finish()?.sync_all()?;
    debug!("packed {} into {}", source_dir.display(), dest.display());
    Ok(())
}

/// Extract a tar archive, gzip-compressed or not, into `dest`.
///
/// Entries that would land outside `dest` are refused by the tar reader.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dest)?;
    let gzip = is_gzip(archive)?;
    let reader = BufReader::new(File::open(archive)?);
    if gzip {
        unpack_from(GzDecoder::new(reader), dest)?;
    } else {
        unpack_from(reader, dest)?;
    }
    debug!("unpacked {} into {}", archive.display(), dest.display());
    Ok(())
}

fn unpack_from<R: Read>(reader: R, dest: &Path) -> Result<(), StoreError> {
    let mut ar = tar::Archive::new(reader);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(dest)?;
    Ok(())
}

fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    if !current.exists() {
        return Ok(result);
    }
    for entry in fs::read_dir(current)? {
        let full = entry?.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .to_string();
        if full.symlink_metadata()?.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    #[cfg(unix)]
    header.set_mode(meta.permissions().mode());
    #[cfg(not(unix))]
    header.set_mode(if meta.is_dir() { 0o755 } else { 0o644 });
    Ok(header)
}
