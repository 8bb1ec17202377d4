//! System-wide constants, default paths, and well-known names.

/// Exit code for any unrecoverable configuration, parse, or build error.
pub const FATAL_EXIT_CODE: i32 = 255;

/// Exit code for a successful build.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Default installation libexec prefix when the environment supplies none.
pub const DEFAULT_LIBEXEC_DIR: &str = "/usr/local/libexec";

/// Environment variable naming the target root filesystem.
pub const ROOTFS_ENV: &str = "ROOTSTRAP_ROOTFS";

/// Environment variable naming the installation libexec prefix.
pub const LIBEXEC_DIR_ENV: &str = "ROOTSTRAP_LIBEXECDIR";

/// Environment variable carrying the definition file path to helpers.
pub const BUILDDEF_ENV: &str = "ROOTSTRAP_BUILDDEF";

/// Environment variable carrying the bootstrap module name to helpers.
pub const MODULE_ENV: &str = "ROOTSTRAP_MODULE";

/// Directory under the libexec prefix holding bootstrap helpers.
pub const BOOTSTRAP_LIBEXEC_SUBDIR: &str = "rootstrap/bootstrap";

/// File name of the frozen v1 driver.
pub const LEGACY_DRIVER_NAME: &str = "driver-v1.sh";

/// Header key naming the population backend.
pub const BOOTSTRAP_KEY: &str = "Bootstrap";

/// Header key carrying the definition format version.
pub const VERSION_KEY: &str = "version";

/// Version assumed when a definition carries no version key.
pub const DEFAULT_DEFINITION_VERSION: u32 = 2;

/// Metadata directory created inside the built root filesystem.
pub const METADATA_DIR: &str = ".rootstrap";

/// Unprivileged uid/gid used when running as real root with no `SUDO_UID`.
pub const NOBODY_ID: u32 = 65534;
