//! End-to-end tests for the bootstrap pipeline.
//!
//! These run the orchestrator from a definition file on disk to an exit
//! code, with module programs and the legacy driver simulated by shell
//! scripts in a scratch libexec tree. Privilege and isolation use the
//! in-process mocks so no root or namespaces are needed, except for the
//! legacy handoff, which goes through the production constructor:
//! 1. Native build through a module backend
//! 2. Missing and unknown backends
//! 3. Legacy driver passthrough
//! 4. Phase ordering and hook output

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use rootstrap_bootstrap::backend::BackendRegistry;
use rootstrap_bootstrap::orchestrator::{Orchestrator, Outcome};
use rootstrap_common::config::BootstrapConfig;
use rootstrap_common::constants::FATAL_EXIT_CODE;
use rootstrap_common::error::BootstrapError;
use rootstrap_common::types::{Phase, PrivilegeState};
use rootstrap_core::mock::{InProcessIsolator, MockMechanism};
use rootstrap_core::{IsolationLayer, PrivilegeController};

struct Workspace {
    dir: tempfile::TempDir,
    config: BootstrapConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BootstrapConfig::new(dir.path().join("rootfs"), dir.path().join("libexec"));
        Self { dir, config }
    }

    fn rootfs(&self) -> &Path {
        self.config.rootfs.as_deref().expect("rootfs configured")
    }

    fn install(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    fn install_module(&self, name: &str, body: &str) {
        Self::install(&self.config.module_program(name), body);
    }

    fn install_driver(&self, body: &str) {
        Self::install(&self.config.legacy_driver(), body);
    }

    fn definition(&self, text: &str) -> PathBuf {
        let path = self.dir.path().join("build.def");
        std::fs::write(&path, text).expect("write definition");
        path
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            BackendRegistry::builtin(&self.config),
            PrivilegeController::new(Box::new(MockMechanism::new())),
            IsolationLayer::new(Box::new(InProcessIsolator::new())),
        )
    }
}

// ── Native builds ────────────────────────────────────────────────────

#[test]
fn busybox_definition_builds_and_exits_zero() {
    let ws = Workspace::new();
    ws.install_module(
        "busybox",
        "echo \"$1\" >> \"$ROOTSTRAP_ROOTFS/etc/stages\"",
    );
    let def = ws.definition("Bootstrap: busybox\n");

    assert_eq!(ws.orchestrator().run(&def), 0);
    let stages = std::fs::read_to_string(ws.rootfs().join("etc/stages")).expect("stages");
    assert_eq!(stages.lines().collect::<Vec<_>>(), ["populate"]);
}

#[test]
fn docker_runs_prepare_before_populate() {
    let ws = Workspace::new();
    ws.install_module(
        "docker",
        "echo \"$1 $ROOTSTRAP_MODULE\" >> \"$ROOTSTRAP_ROOTFS/etc/stages\"",
    );
    let def = ws.definition("Bootstrap: docker\nFrom: alpine:3.20\n");

    assert_eq!(ws.orchestrator().run(&def), 0);
    let stages = std::fs::read_to_string(ws.rootfs().join("etc/stages")).expect("stages");
    assert_eq!(
        stages.lines().collect::<Vec<_>>(),
        ["prepare docker", "populate docker"]
    );
}

#[test]
fn phases_report_observed_context_in_order() {
    let ws = Workspace::new();
    ws.install_module("busybox", "exit 0");
    let def = ws.definition("Bootstrap: busybox\n");

    let outcome = ws.orchestrator().execute(&def).expect("build");
    let Outcome::Native { backend, phases } = outcome else {
        panic!("expected a native outcome");
    };
    assert_eq!(backend, "busybox");
    let order: Vec<Phase> = phases.iter().map(|p| p.phase).collect();
    assert_eq!(order, Phase::ORDER);
    assert_eq!(phases[0].privilege, PrivilegeState::Dropped);
    assert!(!phases[0].isolated);
    assert!(phases[1..]
        .iter()
        .all(|p| p.privilege == PrivilegeState::Elevated && p.isolated));
}

#[test]
fn hooks_write_container_metadata() {
    let ws = Workspace::new();
    ws.install_module("busybox", "exit 0");
    let def = ws.definition(
        "Bootstrap: busybox\n\
         %pre\ntouch \"$ROOTSTRAP_ROOTFS.pre\"\n\
         %setup\ntouch \"$ROOTSTRAP_ROOTFS/etc/setup\"\n\
         %labels\nAuthor builder\n\
         %runscript\necho run\n",
    );

    assert_eq!(ws.orchestrator().run(&def), 0);
    let rootfs = ws.rootfs();
    assert!(ws.dir.path().join("rootfs.pre").exists());
    assert!(rootfs.join("etc/setup").exists());
    assert!(rootfs.join(".rootstrap/labels.json").exists());
    assert!(rootfs.join(".rootstrap/runscript").exists());
}

#[test]
fn failing_module_exits_fatal() {
    let ws = Workspace::new();
    ws.install_module("yum", "[ \"$1\" = populate ] && exit 1; touch \"$ROOTSTRAP_ROOTFS/finalized\"");
    let def = ws.definition("Bootstrap: yum\n");

    assert_eq!(ws.orchestrator().run(&def), FATAL_EXIT_CODE);
    assert!(!ws.rootfs().join("finalized").exists());
}

// ── Backend resolution ───────────────────────────────────────────────

#[test]
fn missing_bootstrap_key_is_missing_backend() {
    let ws = Workspace::new();
    let def = ws.definition("");

    let err = ws.orchestrator().execute(&def).expect_err("should fail");
    assert!(matches!(err, BootstrapError::MissingBackend { .. }));
    assert_eq!(err.exit_code(), FATAL_EXIT_CODE);
    assert!(!ws.rootfs().exists());
}

#[test]
fn near_miss_backend_is_unknown_and_touches_nothing() {
    let ws = Workspace::new();
    ws.install_module("docker", "exit 0");
    let def = ws.definition("Bootstrap: dockerz\n");

    let err = ws.orchestrator().execute(&def).expect_err("should fail");
    assert!(matches!(err, BootstrapError::UnknownBackend { ref name } if name == "dockerz"));
    assert_eq!(ws.orchestrator().run(&def), FATAL_EXIT_CODE);
    assert!(!ws.rootfs().exists());
}

// ── Legacy driver ────────────────────────────────────────────────────

#[test]
fn version_one_hands_off_to_driver() {
    let ws = Workspace::new();
    ws.install_driver("[ -f \"$1\" ] || exit 99\nexit 7");
    let def = ws.definition("version: 1\nBootstrap: busybox\n");

    assert_eq!(ws.orchestrator().run(&def), 7);
    assert!(!ws.rootfs().exists());
}

#[test]
fn version_one_driver_keeps_launch_credentials() {
    let ws = Workspace::new();
    let seen = ws.dir.path().join("driver-ids");
    ws.install_driver(&format!("echo \"$(id -u) $(id -ru)\" > {}", seen.display()));
    let def = ws.definition("version: 1\n");

    let orchestrator = Orchestrator::from_config(ws.config.clone()).expect("detect credentials");
    assert_eq!(orchestrator.run(&def), 0);

    let ours = std::process::Command::new("/bin/sh")
        .args(["-c", "echo \"$(id -u) $(id -ru)\""])
        .output()
        .expect("id");
    let driver = std::fs::read_to_string(seen).expect("driver ids");
    assert_eq!(driver.trim(), String::from_utf8_lossy(&ours.stdout).trim());
}

#[test]
fn version_one_without_driver_is_fatal() {
    let ws = Workspace::new();
    let def = ws.definition("version: 1\n");

    assert!(matches!(
        ws.orchestrator().execute(&def),
        Err(BootstrapError::Config { .. })
    ));
}

#[test]
fn explicit_version_two_takes_native_path() {
    let ws = Workspace::new();
    ws.install_driver("exit 7");
    ws.install_module("busybox", "exit 0");
    let def = ws.definition("version: 2\nBootstrap: busybox\n");

    assert_eq!(ws.orchestrator().run(&def), 0);
}
