use crate::layout::StoreLayout;
use crate::StoreError;
use scs_schema::StorageUri;
use std::path::{Component, Path, PathBuf};

/// Map a storage URI to a host path.
///
/// `private://` and `public://` resolve below the store's file areas; an
/// absolute path is taken as-is. Relative remainders may not climb out of
/// their area.
pub fn resolve_storage_uri(layout: &StoreLayout, uri: &StorageUri) -> Result<PathBuf, StoreError> {
    let raw = uri.as_str();
    let (base, rest) = if let Some(rest) = raw.strip_prefix("private://") {
        (layout.private_files_dir(), rest)
    } else if let Some(rest) = raw.strip_prefix("public://") {
        (layout.public_files_dir(), rest)
    } else if Path::new(raw).is_absolute() {
        return Ok(PathBuf::from(raw));
    } else {
        return Err(StoreError::InvalidUri(raw.to_owned()));
    };

    let rel = Path::new(rest);
    let contained = !rest.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(StoreError::InvalidUri(raw.to_owned()));
    }
    Ok(base.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StoreLayout {
        StoreLayout::new("/srv/scs")
    }

    #[test]
    fn resolves_private_and_public() {
        assert_eq!(
            resolve_storage_uri(&layout(), &StorageUri::new("private://snapshots/7.tar.gz")).unwrap(),
            PathBuf::from("/srv/scs/files/private/snapshots/7.tar.gz")
        );
        assert_eq!(
            resolve_storage_uri(&layout(), &StorageUri::new("public://a.tar")).unwrap(),
            PathBuf::from("/srv/scs/files/public/a.tar")
        );
    }

    #[test]
    fn absolute_path_passes_through() {
        assert_eq!(
            resolve_storage_uri(&layout(), &StorageUri::new("/mnt/backups/x.tar.gz")).unwrap(),
            PathBuf::from("/mnt/backups/x.tar.gz")
        );
    }

    #[test]
    fn rejects_unknown_scheme_and_escape() {
        for bad in [
            "s3://bucket/x",
            "relative/path",
            "private://../../etc/passwd",
            "private://",
        ] {
            assert!(
                matches!(
                    resolve_storage_uri(&layout(), &StorageUri::new(bad)),
                    Err(StoreError::InvalidUri(_))
                ),
                "{bad} accepted"
            );
        }
    }
}
