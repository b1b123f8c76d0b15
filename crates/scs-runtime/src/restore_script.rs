//! The POSIX shell script a restore container runs against a volume.
//!
//! Protocol: back up the target, extract the dump into a scratch directory,
//! then swap the target's content for the extracted tree. Any failure after
//! the backup exists puts the backup back, writes [`FAILURE_MARKER`] and exits
//! non-zero; success writes [`SENTINEL_FILE`]. Both markers live in the work
//! directory so the host can poll for them.

use std::fmt::Write;
use std::path::{Path, PathBuf};

pub const SENTINEL_FILE: &str = "restore.done";
pub const FAILURE_MARKER: &str = "restore.failed";
pub const SCRIPT_FILE: &str = "restore.sh";

/// In-container mount points.
pub const CONTAINER_TARGET: &str = "/restore/target";
pub const CONTAINER_WORK: &str = "/restore/work";
pub const CONTAINER_DUMP_DIR: &str = "/restore/dump";

pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn shell_quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePaths {
    /// Directory whose content is replaced.
    pub target: PathBuf,
    /// Holds `extract/`, `rollback/` and the marker files.
    pub work: PathBuf,
    pub dump_file: PathBuf,
}

impl RestorePaths {
    /// Paths as seen inside the restore container.
    pub fn in_container(dump_file_name: &str) -> Self {
        Self {
            target: PathBuf::from(CONTAINER_TARGET),
            work: PathBuf::from(CONTAINER_WORK),
            dump_file: Path::new(CONTAINER_DUMP_DIR).join(dump_file_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreScript {
    pub paths: RestorePaths,
    /// `uid:gid` to hand the restored tree to.
    pub owner: Option<(u32, u32)>,
    /// Used in the backup file name.
    pub timestamp: String,
}

pub fn build_restore_script(script: &RestoreScript) -> String {
    let p = &script.paths;
    let mut s = String::new();
    let _ = writeln!(s, "#!/bin/sh");
    let _ = writeln!(s, "set -eu");
    let _ = writeln!(s, "TARGET={}", shell_quote_path(&p.target));
    let _ = writeln!(s, "WORK={}", shell_quote_path(&p.work));
    let _ = writeln!(s, "DUMP={}", shell_quote_path(&p.dump_file));
    s.push_str("EXTRACT=\"$WORK/extract\"\n");
    s.push_str("ROLLBACK=\"$WORK/rollback\"\n");
    let _ = writeln!(
        s,
        "BACKUP=\"$ROLLBACK/\"{}",
        shell_quote(&format!("backup-{}.tar.gz", script.timestamp))
    );
    let _ = writeln!(s, "DONE=\"$WORK/{SENTINEL_FILE}\"");
    let _ = writeln!(s, "FAILED=\"$WORK/{FAILURE_MARKER}\"");
    s.push_str(
        r#"
mkdir -p "$EXTRACT" "$ROLLBACK" "$TARGET"
rm -f "$DONE" "$FAILED"

if ! tar -czf "$BACKUP" -C "$TARGET" .; then
    echo "backup of target failed" > "$FAILED"
    exit 1
fi

empty_target() {
    find "$TARGET" -mindepth 1 -maxdepth 1 -exec rm -rf {} +
}

rollback() {
    reason="$1"
    empty_target || reason="$reason; clearing target for rollback failed"
    tar -xzf "$BACKUP" -C "$TARGET" || reason="$reason; unpacking backup failed"
    echo "$reason" > "$FAILED"
    echo "restore failed: $reason" >&2
    exit 1
}

if ! tar -xf "$DUMP" -C "$EXTRACT"; then
    rollback "extracting dump failed"
fi

if ! empty_target; then
    rollback "clearing target failed"
fi
if ! cp -a "$EXTRACT/." "$TARGET/"; then
    rollback "copying restored files failed"
fi
"#,
    );
    if let Some((uid, gid)) = script.owner {
        let _ = write!(
            s,
            "if ! chown -R {uid}:{gid} \"$TARGET\"; then\n    rollback \"chown {uid}:{gid} failed\"\nfi\n"
        );
    }
    s.push_str("rm -rf \"$EXTRACT\"\ndate -u +%Y-%m-%dT%H:%M:%SZ > \"$DONE\"\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(owner: Option<(u32, u32)>) -> String {
        build_restore_script(&RestoreScript {
            paths: RestorePaths::in_container("files.tar.gz"),
            owner,
            timestamp: "20240501T100000Z".to_owned(),
        })
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("hello"), "'hello'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn script_uses_container_mounts() {
        let s = script(None);
        assert!(s.starts_with("#!/bin/sh\nset -eu\n"));
        assert!(s.contains("TARGET='/restore/target'"));
        assert!(s.contains("WORK='/restore/work'"));
        assert!(s.contains("DUMP='/restore/dump/files.tar.gz'"));
        assert!(s.contains("backup-20240501T100000Z.tar.gz"));
        assert!(!s.contains("chown"));
    }

    #[test]
    fn backup_precedes_target_mutation() {
        let s = script(None);
        let backup = s.find("tar -czf").unwrap();
        let first_empty = s.find("if ! empty_target; then").unwrap();
        let extract = s.find("tar -xf \"$DUMP\"").unwrap();
        assert!(backup < extract);
        assert!(extract < first_empty);
    }

    #[test]
    fn every_target_mutation_is_checked() {
        let s = script(None);
        assert!(s.contains("if ! empty_target; then\n    rollback \"clearing target failed\"\nfi"));
        assert!(s.contains("empty_target || reason="));
        assert!(s.contains("tar -xzf \"$BACKUP\" -C \"$TARGET\" || reason="));
        assert!(!s.contains("\nempty_target\n"));
    }

    #[test]
    fn owner_adds_chown_with_rollback() {
        let s = script(Some((33, 33)));
        assert!(s.contains("chown -R 33:33 \"$TARGET\""));
        assert!(s.contains("rollback \"chown 33:33 failed\""));
        assert!(s.find("chown").unwrap() < s.find("> \"$DONE\"").unwrap());
    }

    #[test]
    fn hostile_dump_name_is_quoted() {
        let s = build_restore_script(&RestoreScript {
            paths: RestorePaths::in_container("x'; rm -rf /; '.tar"),
            owner: None,
            timestamp: "t".to_owned(),
        });
        assert!(s.contains("DUMP='/restore/dump/x'\\''; rm -rf /; '\\''.tar'"));
    }
}
