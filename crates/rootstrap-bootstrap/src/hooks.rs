//! Definition-driven work that brackets backend population.
//!
//! Pre-bootstrap runs `%pre` on the host. The rootfs skeleton is laid out
//! at the start of module population, under root, so it is root-owned.
//! Post-bootstrap runs `%setup`, writes the container metadata sections and
//! runs `%post` inside the rootfs.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use rootstrap_common::constants::{BUILDDEF_ENV, METADATA_DIR, ROOTFS_ENV};
use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_definition::Definition;

use crate::process::{self, Launcher};

/// Top-level directories every rootfs gets before population.
pub const SKELETON: [&str; 10] = [
    "bin", "dev", "etc", "home", "proc", "root", "sys", "tmp", "usr", "var",
];

/// Host filesystems bound into the rootfs while `%post` runs.
const POST_BINDS: [&str; 3] = ["/dev", "/proc", "/sys"];

const DEFAULT_SHEBANG: &str = "#!/bin/sh";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BootstrapError + '_ {
    move |source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Path of the metadata directory inside a rootfs.
pub fn metadata_dir(rootfs: &Path) -> PathBuf {
    rootfs.join(METADATA_DIR)
}

/// Runs the `%pre` section on the host.
///
/// The rootfs may not exist yet.
///
/// # Errors
///
/// Returns [`BootstrapError::Build`] if `%pre` exits non-zero.
pub fn pre_bootstrap(rootfs: &Path, definition: &Definition, launcher: &Launcher) -> Result<()> {
    run_host_section("pre", rootfs, definition, launcher)
}

/// Runs `%setup`, writes metadata, then runs `%post` inside the rootfs.
///
/// The host `/dev`, `/proc` and `/sys` are bound into the rootfs for `%post`
/// only when `isolated` is set, so the binds land in a private mount table.
///
/// # Errors
///
/// Returns [`BootstrapError::Build`] if a script exits non-zero,
/// [`BootstrapError::Io`] if metadata cannot be written, or
/// [`BootstrapError::Isolation`] if a bind mount fails.
pub fn post_bootstrap(
    rootfs: &Path,
    definition: &Definition,
    isolated: bool,
    launcher: &Launcher,
) -> Result<()> {
    run_host_section("setup", rootfs, definition, launcher)?;
    write_environment(rootfs, definition)?;
    write_labels(rootfs, definition)?;
    write_runscript(rootfs, definition)?;
    run_post(rootfs, definition, isolated, launcher)
}

/// Creates the top-level rootfs directories, with a sticky `/tmp`.
///
/// Existing directories are kept; files are owned by the caller's
/// effective ids.
///
/// # Errors
///
/// Returns [`BootstrapError::Io`] if a directory cannot be created.
pub fn create_skeleton(rootfs: &Path) -> Result<()> {
    for dir in SKELETON {
        let path = rootfs.join(dir);
        std::fs::create_dir_all(&path).map_err(io_error(&path))?;
    }
    let tmp = rootfs.join("tmp");
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o1777))
        .map_err(io_error(&tmp))?;
    tracing::debug!(rootfs = %rootfs.display(), "rootfs skeleton created");
    Ok(())
}

fn run_host_section(
    name: &str,
    rootfs: &Path,
    definition: &Definition,
    launcher: &Launcher,
) -> Result<()> {
    let Some(script) = definition.script(name) else {
        return Ok(());
    };
    tracing::info!(section = name, "running %{name} on the host");
    let mut cmd = process::shell_script(&script, rootfs, definition.path());
    launcher.run(&mut cmd, &format!("%{name} section"))
}

fn write_environment(rootfs: &Path, definition: &Definition) -> Result<()> {
    let Some(script) = definition.script("environment") else {
        return Ok(());
    };
    let dir = metadata_dir(rootfs).join("env");
    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    let path = dir.join("90-environment.sh");
    std::fs::write(&path, script).map_err(io_error(&path))?;
    tracing::debug!(path = %path.display(), "environment written");
    Ok(())
}

/// Parses `%labels` lines of the form `KEY value`.
///
/// Blank lines and `#` comments are skipped. A key without a value maps to
/// an empty string; a repeated key keeps its last value.
pub fn parse_labels(lines: &[String]) -> BTreeMap<String, String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key.to_owned(), value.trim().to_owned()),
            None => (line.to_owned(), String::new()),
        })
        .collect()
}

fn write_labels(rootfs: &Path, definition: &Definition) -> Result<()> {
    let labels = parse_labels(definition.section("labels"));
    if labels.is_empty() {
        return Ok(());
    }
    let dir = metadata_dir(rootfs);
    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    let path = dir.join("labels.json");
    let json = serde_json::to_string_pretty(&labels)
        .map_err(|e| BootstrapError::build(format!("failed to serialize labels: {e}")))?;
    std::fs::write(&path, json).map_err(io_error(&path))?;
    tracing::debug!(path = %path.display(), count = labels.len(), "labels written");
    Ok(())
}

fn write_runscript(rootfs: &Path, definition: &Definition) -> Result<()> {
    let Some(script) = definition.script("runscript") else {
        return Ok(());
    };
    let dir = metadata_dir(rootfs);
    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    let path = dir.join("runscript");
    let body = if script.starts_with("#!") {
        script
    } else {
        format!("{DEFAULT_SHEBANG}\n{script}")
    };
    std::fs::write(&path, body).map_err(io_error(&path))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .map_err(io_error(&path))?;
    tracing::debug!(path = %path.display(), "runscript written");
    Ok(())
}

fn run_post(
    rootfs: &Path,
    definition: &Definition,
    isolated: bool,
    launcher: &Launcher,
) -> Result<()> {
    let Some(script) = definition.script("post") else {
        return Ok(());
    };
    let chroot = which::which("chroot")
        .map_err(|e| BootstrapError::build(format!("chroot not found in PATH: {e}")))?;

    if isolated {
        for source in POST_BINDS {
            let source = Path::new(source);
            let target = rootfs.join(source.strip_prefix("/").unwrap_or(source));
            rootstrap_core::filesystem::mount::bind_mount(source, &target)?;
        }
    } else {
        tracing::warn!("not isolated, running %post without host filesystems bound");
    }

    tracing::info!(section = "post", chroot = %chroot.display(), "running %post inside the rootfs");
    let mut cmd = Command::new(chroot);
    let _ = cmd
        .arg(rootfs)
        .args(["/bin/sh", "-e", "-c", &script])
        .env(ROOTFS_ENV, "/")
        .env(BUILDDEF_ENV, definition.path());
    launcher.run(&mut cmd, "%post section")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_has_sticky_tmp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        create_skeleton(&rootfs).expect("skeleton");
        create_skeleton(&rootfs).expect("skeleton is idempotent");
        for name in SKELETON {
            assert!(rootfs.join(name).is_dir(), "{name} missing");
        }
        let mode = std::fs::metadata(rootfs.join("tmp"))
            .expect("stat tmp")
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }

    #[test]
    fn pre_section_runs_on_host_before_rootfs_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        let definition = Definition::parse(
            "Bootstrap: busybox\n%pre\n[ ! -e \"$ROOTSTRAP_ROOTFS\" ]\ntouch \"$ROOTSTRAP_ROOTFS.pre\"\n",
        )
        .expect("parse");
        pre_bootstrap(&rootfs, &definition, &Launcher::default()).expect("pre-bootstrap");
        assert!(dir.path().join("rootfs.pre").exists());
        assert!(!rootfs.exists());
    }

    #[test]
    fn failing_setup_names_the_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let definition = Definition::parse("%setup\nexit 4\n").expect("parse");
        let err = post_bootstrap(dir.path(), &definition, false, &Launcher::default())
            .expect_err("should fail");
        assert!(matches!(err, BootstrapError::Build { .. }));
        assert!(err.to_string().contains("%setup"));
    }

    #[test]
    fn post_bootstrap_writes_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = "Bootstrap: busybox\n\
                    %environment\nexport LANG=C\n\
                    %labels\nMaintainer ops team\n# ignored\nVersion 1.2\n\
                    %runscript\nexec /bin/echo hello\n";
        let definition = Definition::parse(text).expect("parse");
        post_bootstrap(dir.path(), &definition, false, &Launcher::default())
            .expect("post-bootstrap");

        let meta = metadata_dir(dir.path());
        let env = std::fs::read_to_string(meta.join("env/90-environment.sh")).expect("env");
        assert_eq!(env, "export LANG=C\n");

        let labels: BTreeMap<String, String> = serde_json::from_str(
            &std::fs::read_to_string(meta.join("labels.json")).expect("labels"),
        )
        .expect("json");
        assert_eq!(labels.get("Maintainer").map(String::as_str), Some("ops team"));
        assert_eq!(labels.get("Version").map(String::as_str), Some("1.2"));
        assert_eq!(labels.len(), 2);

        let runscript = meta.join("runscript");
        let body = std::fs::read_to_string(&runscript).expect("runscript");
        assert!(body.starts_with("#!/bin/sh\n"));
        let mode = std::fs::metadata(&runscript).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn runscript_keeps_its_own_shebang() {
        let dir = tempfile::tempdir().expect("tempdir");
        let definition =
            Definition::parse("%runscript\n#!/bin/bash\necho hi\n").expect("parse");
        post_bootstrap(dir.path(), &definition, false, &Launcher::default())
            .expect("post-bootstrap");
        let body = std::fs::read_to_string(metadata_dir(dir.path()).join("runscript"))
            .expect("runscript");
        assert_eq!(body, "#!/bin/bash\necho hi\n");
    }

    #[test]
    fn empty_sections_write_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let definition = Definition::parse("Bootstrap: busybox\n%labels\n\n").expect("parse");
        post_bootstrap(dir.path(), &definition, false, &Launcher::default())
            .expect("post-bootstrap");
        assert!(!metadata_dir(dir.path()).exists());
    }

    #[test]
    fn label_without_value_is_empty() {
        let labels = parse_labels(&["Solo".to_owned(), "  K   spaced  value ".to_owned()]);
        assert_eq!(labels.get("Solo").map(String::as_str), Some(""));
        assert_eq!(labels.get("K").map(String::as_str), Some("spaced  value"));
    }
}
