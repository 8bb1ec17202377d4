//! Mount table inspection and deterministic teardown.
//!
//! An isolated phase snapshots `/proc/self/mountinfo` before it runs and
//! unmounts every entry added since, deepest first. Each unmount is retried
//! a bounded number of times before the failure becomes fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rootstrap_common::error::{BootstrapError, Result};

/// Attempts per mount point before teardown gives up.
pub const UNMOUNT_ATTEMPTS: u32 = 3;

/// Pause between unmount attempts.
pub const UNMOUNT_BACKOFF: Duration = Duration::from_millis(100);

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// One line of `mountinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Unique mount id.
    pub id: u32,
    /// Id of the parent mount.
    pub parent: u32,
    /// Mount point, with octal escapes decoded.
    pub mount_point: PathBuf,
}

/// Snapshot of a process's mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Reads the calling process's mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc/self/mountinfo` cannot be read or parsed.
    pub fn snapshot() -> Result<Self> {
        let content = std::fs::read_to_string(MOUNTINFO).map_err(|e| BootstrapError::Io {
            path: MOUNTINFO.into(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses `mountinfo` text.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Isolation`] on a line with fewer than five
    /// fields or non-numeric ids.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, parent, _, _, mount_point, ..] = fields.as_slice() else {
                return Err(BootstrapError::isolation(format!(
                    "malformed mountinfo line: {line}"
                )));
            };
            let parse_id = |s: &str| {
                s.parse::<u32>().map_err(|_| {
                    BootstrapError::isolation(format!("malformed mount id in: {line}"))
                })
            };
            entries.push(MountEntry {
                id: parse_id(id)?,
                parent: parse_id(parent)?,
                mount_point: PathBuf::from(unescape(mount_point)),
            });
        }
        Ok(Self { entries })
    }

    /// Number of mount entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in kernel order.
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Entries present here but absent from `before`, deepest first.
    pub fn added_since(&self, before: &Self) -> Vec<&MountEntry> {
        let mut added: Vec<&MountEntry> = self
            .entries
            .iter()
            .filter(|e| !before.entries.iter().any(|b| b.id == e.id))
            .collect();
        added.sort_by(|a, b| {
            depth(&b.mount_point)
                .cmp(&depth(&a.mount_point))
                .then(b.id.cmp(&a.id))
        });
        added
    }
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Decodes the `\NNN` octal escapes the kernel uses for spaces and friends.
fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Detaches a single mount point.
pub trait Unmounter {
    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel refuses the unmount.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Unmounter backed by `umount2(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallUnmounter;

impl Unmounter for SyscallUnmounter {
    #[cfg(target_os = "linux")]
    fn unmount(&self, target: &Path) -> Result<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(|e| {
            BootstrapError::isolation(format!("umount {} failed: {e}", target.display()))
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn unmount(&self, _target: &Path) -> Result<()> {
        Err(BootstrapError::Config {
            message: "Linux required for native bootstrap operations".into(),
        })
    }
}

/// Recursively bind-mounts `source` onto `target`, creating `target`.
///
/// Meant for isolated phases only: the mount lands in the private mount
/// table and is removed by [`teardown`].
///
/// # Errors
///
/// Returns an error if the target cannot be created or `mount(2)` fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    std::fs::create_dir_all(target).map_err(|e| BootstrapError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| {
        BootstrapError::isolation(format!(
            "bind mount {} -> {} failed: {e}",
            source.display(),
            target.display()
        ))
    })?;
    tracing::debug!(source = %source.display(), target = %target.display(), "bind mount created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: bind mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path) -> Result<()> {
    Err(BootstrapError::Config {
        message: "Linux required for native bootstrap operations".into(),
    })
}

/// Unmounts every entry of `after` that is not in `before`.
///
/// Returns the number of mount points removed.
///
/// # Errors
///
/// Returns [`BootstrapError::Isolation`] naming the first mount point that
/// still refuses to go away after `attempts` tries.
pub fn teardown(
    before: &MountTable,
    after: &MountTable,
    unmounter: &dyn Unmounter,
    attempts: u32,
    backoff: Duration,
) -> Result<usize> {
    let added = after.added_since(before);
    for entry in &added {
        unmount_with_retry(&entry.mount_point, unmounter, attempts.max(1), backoff)?;
    }
    if !added.is_empty() {
        tracing::debug!(count = added.len(), "private mounts torn down");
    }
    Ok(added.len())
}

fn unmount_with_retry(
    target: &Path,
    unmounter: &dyn Unmounter,
    attempts: u32,
    backoff: Duration,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match unmounter.unmount(target) {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(BootstrapError::isolation(format!(
                    "giving up on {} after {attempts} attempts: {e}",
                    target.display()
                )));
            }
            Err(e) => {
                tracing::warn!(target = %target.display(), attempt, error = %e, "unmount failed, retrying");
                std::thread::sleep(backoff);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    const BEFORE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid shared:12 - proc proc rw
24 22 0:22 / /sys rw,nosuid shared:7 - sysfs sysfs rw
";

    const AFTER: &str = "\
22 1 8:1 / / rw,relatime - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid - proc proc rw
24 22 0:22 / /sys rw,nosuid - sysfs sysfs rw
40 22 0:50 / /build/rootfs/proc rw - proc proc rw
41 22 0:5 / /build/rootfs/dev rw - devtmpfs udev rw
42 41 0:51 / /build/rootfs/dev/pts rw - devpts devpts rw
43 22 8:1 /home /build/my\\040rootfs rw - ext4 /dev/sda1 rw
";

    #[derive(Default)]
    struct FakeUnmounter {
        calls: RefCell<Vec<PathBuf>>,
        failures: RefCell<HashMap<PathBuf, u32>>,
    }

    impl FakeUnmounter {
        fn failing(target: &str, times: u32) -> Self {
            let fake = Self::default();
            let _ = fake.failures.borrow_mut().insert(PathBuf::from(target), times);
            fake
        }
    }

    impl Unmounter for FakeUnmounter {
        fn unmount(&self, target: &Path) -> Result<()> {
            self.calls.borrow_mut().push(target.to_path_buf());
            let mut failures = self.failures.borrow_mut();
            if let Some(left) = failures.get_mut(target) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BootstrapError::isolation("EBUSY"));
                }
            }
            Ok(())
        }
    }

    fn tables() -> (MountTable, MountTable) {
        (
            MountTable::parse(BEFORE).expect("parse before"),
            MountTable::parse(AFTER).expect("parse after"),
        )
    }

    #[test]
    fn parse_mountinfo_fields() {
        let (before, after) = tables();
        assert_eq!(before.len(), 3);
        assert_eq!(after.len(), 7);
        assert_eq!(after.entries()[5].parent, 41);
        assert_eq!(
            after.entries()[6].mount_point,
            PathBuf::from("/build/my rootfs")
        );
    }

    #[test]
    fn parse_rejects_truncated_line() {
        assert!(MountTable::parse("22 1 8:1 /\n").is_err());
        assert!(MountTable::parse("x 1 8:1 / / rw\n").is_err());
    }

    #[test]
    fn added_entries_are_deepest_first() {
        let (before, after) = tables();
        let added: Vec<_> = after
            .added_since(&before)
            .into_iter()
            .map(|e| e.mount_point.clone())
            .collect();
        assert_eq!(added[0], PathBuf::from("/build/rootfs/dev/pts"));
        assert_eq!(added.len(), 4);
    }

    #[test]
    fn teardown_removes_exactly_the_added_mounts() {
        let (before, after) = tables();
        let fake = FakeUnmounter::default();
        let removed =
            teardown(&before, &after, &fake, UNMOUNT_ATTEMPTS, Duration::ZERO).expect("teardown");
        assert_eq!(removed, 4);
        let calls = fake.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert!(!calls.contains(&PathBuf::from("/proc")));
    }

    #[test]
    fn teardown_retries_transient_failures() {
        let (before, after) = tables();
        let fake = FakeUnmounter::failing("/build/rootfs/proc", 2);
        let removed =
            teardown(&before, &after, &fake, UNMOUNT_ATTEMPTS, Duration::ZERO).expect("teardown");
        assert_eq!(removed, 4);
        assert_eq!(fake.calls.borrow().len(), 6);
    }

    #[test]
    fn teardown_gives_up_after_bounded_attempts() {
        let (before, after) = tables();
        let fake = FakeUnmounter::failing("/build/rootfs/dev/pts", 10);
        let err = teardown(&before, &after, &fake, UNMOUNT_ATTEMPTS, Duration::ZERO)
            .expect_err("teardown should fail");
        assert!(matches!(err, BootstrapError::Isolation { .. }));
        assert_eq!(fake.calls.borrow().len(), 3);
    }

    #[test]
    fn teardown_of_unchanged_table_is_a_no_op() {
        let (before, _) = tables();
        let fake = FakeUnmounter::default();
        let removed =
            teardown(&before, &before, &fake, UNMOUNT_ATTEMPTS, Duration::ZERO).expect("teardown");
        assert_eq!(removed, 0);
        assert!(fake.calls.borrow().is_empty());
    }
}
