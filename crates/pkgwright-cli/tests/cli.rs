//! End-to-end tests that drive the `pkgwright` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test context with an isolated pkgwright home and a small project.
struct TestContext {
    temp_dir: TempDir,
    home: PathBuf,
    project: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let home = temp_dir.path().join(".pkgwright");
        let project = temp_dir.path().join("project");
        fs::create_dir_all(home.join("BUILD/demo-1.0")).expect("failed to create home");
        fs::create_dir_all(project.join("out")).expect("failed to create project");

        fs::write(project.join("out/demo"), "#!/bin/sh\necho demo\n").unwrap();
        fs::write(project.join("demo-1.0.tar.gz"), "not really a tarball").unwrap();
        fs::write(home.join("BUILD/demo-1.0/post.sh"), "echo %{name}\n").unwrap();
        fs::write(
            project.join("pkgwright.toml"),
            r#"
            [source]
            name = "demo"
            version = "1.0"
            release = "1"
            license = "MIT"
            arch = "x86_64"
            os = "linux"
            files = ["demo-1.0.tar.gz"]

            [macros]
            name = "demo"

            [build]
            subdir = "demo-1.0"

            [[package]]
            files = [{ src = "out/demo", dest = "/usr/bin/demo", mode = 0o755 }]

            [package.script_files]
            post_install = "post.sh"
            "#,
        )
        .unwrap();

        Self {
            temp_dir,
            home,
            project,
        }
    }

    fn cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_pkgwright");
        let mut cmd = Command::new(bin_path);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("PKGWRIGHT_HOME", &self.home);
        cmd.env_remove("PKGWRIGHT_SIGNING_KEY");
        cmd.env_remove("PKGWRIGHT_PUBLIC_KEY");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    fn build(&self) -> Output {
        self.cmd()
            .arg("build")
            .arg(self.project.join("pkgwright.toml"))
            .output()
            .expect("failed to run pkgwright")
    }

    fn binary_package(&self) -> PathBuf {
        self.home.join("RPMS/x86_64/demo-1.0-1.x86_64.rpm")
    }

    fn source_package(&self) -> PathBuf {
        self.home.join("SRPMS/demo-1.0-1.src.rpm")
    }

    fn inspect_json(&self, file: &Path) -> serde_json::Value {
        let output = self
            .cmd()
            .args(["inspect", "--json"])
            .arg(file)
            .output()
            .expect("failed to run pkgwright");
        assert!(output.status.success(), "{}", stderr(&output));
        serde_json::from_slice(&output.stdout).expect("inspect output is not JSON")
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.cmd().arg("--help").output().expect("failed to run pkgwright");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}

#[test]
fn test_build_then_inspect() {
    let ctx = TestContext::new();
    let output = ctx.build();
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stderr(&output).contains("Wrote:"));
    assert!(ctx.source_package().exists());
    assert!(ctx.binary_package().exists());

    let bin = ctx.inspect_json(&ctx.binary_package());
    assert_eq!(bin["lead"]["name"], "demo-1.0-1");
    assert_eq!(bin["lead"]["kind"], "binary");
    assert_eq!(bin["region"]["digest_ok"], true);
    assert_eq!(bin["region"]["size_ok"], true);
    assert_eq!(bin["header"]["SOURCERPM"], "demo-1.0-1.src.rpm");
    assert_eq!(bin["header"]["POSTIN"], "echo demo\n");
    assert_eq!(bin["header"]["ARCHIVESIZE"], bin["payload"]["size"]);

    let src = ctx.inspect_json(&ctx.source_package());
    assert_eq!(src["lead"]["kind"], "source");
    assert_eq!(src["header"]["COOKIE"], bin["header"]["COOKIE"]);
}

#[test]
fn test_binaries_only_has_unknown_source() {
    let ctx = TestContext::new();
    let output = ctx
        .cmd()
        .args(["build", "--binaries-only"])
        .arg(ctx.project.join("pkgwright.toml"))
        .output()
        .expect("failed to run pkgwright");
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!ctx.source_package().exists());

    let bin = ctx.inspect_json(&ctx.binary_package());
    assert_eq!(bin["header"]["SOURCERPM"], "(unknown)");
}

#[test]
fn test_signed_build_verifies() {
    let ctx = TestContext::new();
    let key_path = ctx.temp_dir.path().join("signing.key");
    let output = ctx
        .cmd()
        .args(["keygen", "--output"])
        .arg(&key_path)
        .output()
        .expect("failed to run pkgwright");
    assert!(output.status.success(), "{}", stderr(&output));
    let public = String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|l| l.strip_prefix("public: ").map(str::to_string))
        .expect("no public key printed");
    let secret = fs::read_to_string(&key_path).unwrap();

    fs::write(ctx.home.join("config.toml"), "[signing]\nkind = \"ed25519\"\n").unwrap();
    let output = ctx
        .cmd()
        .env("PKGWRIGHT_SIGNING_KEY", secret.trim())
        .arg("build")
        .arg(ctx.project.join("pkgwright.toml"))
        .output()
        .expect("failed to run pkgwright");
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ctx
        .cmd()
        .args(["inspect", "--public-key", &public])
        .arg(ctx.binary_package())
        .output()
        .expect("failed to run pkgwright");
    assert!(output.status.success(), "{}", stderr(&output));
}

#[test]
fn test_signing_without_key_writes_nothing() {
    let ctx = TestContext::new();
    fs::write(ctx.home.join("config.toml"), "[signing]\nkind = \"ed25519\"\n").unwrap();

    let output = ctx.build();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("PKGWRIGHT_SIGNING_KEY"));
    assert!(!ctx.source_package().exists());
    assert!(!ctx.binary_package().exists());
}

#[test]
fn test_inspect_detects_corruption() {
    let ctx = TestContext::new();
    assert!(ctx.build().status.success());

    let path = ctx.binary_package();
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let output = ctx
        .cmd()
        .arg("inspect")
        .arg(&path)
        .output()
        .expect("failed to run pkgwright");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("corrupt"));
}
