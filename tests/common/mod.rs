// Common test utilities shared across acceptance tests
//
// Each test gets its own TestWorkspace: a temp directory holding fake bridge
// inputs, a fake JVM launcher, the cache and a HOME, so no test reads or
// writes global state and tests can run in parallel.
//
// The fake launcher records every invocation (one line of arguments) in
// `java.log` inside the workspace and writes a fixed jar to the `-d` target.
// Its behavior is switched through environment variables:
// - FAKE_JAVA_FAIL: write partial output, print to stderr, exit 1
// - FAKE_JAVA_SLEEP: sleep this many seconds before writing output
// - FAKE_JAVA_HANG: exec into `sleep` and never write output

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const FAKE_JAR_CONTENTS: &str = "PK fake compiler bridge";

const FAKE_JAVA: &str = r#"#!/bin/sh
echo "$@" >> "$FAKE_JAVA_LOG"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-d" ]; then out="$arg"; fi
  prev="$arg"
done
if [ -n "$FAKE_JAVA_HANG" ]; then
  exec sleep "$FAKE_JAVA_HANG"
fi
if [ -n "$FAKE_JAVA_FAIL" ]; then
  printf 'partial' > "$out"
  echo "error: bridge does not compile" >&2
  exit 1
fi
if [ -n "$FAKE_JAVA_SLEEP" ]; then
  sleep "$FAKE_JAVA_SLEEP"
fi
printf 'PK fake compiler bridge' > "$out"
"#;

pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: TempDir::new().unwrap(),
        };

        workspace.create_file("bridge/xsbt/CompilerBridge.scala", "class CompilerBridge");
        workspace.create_file("bridge/xsbt/DelegatingReporter.scala", "class DelegatingReporter");
        workspace.create_file("lib/compiler-interface.jar", "interface");
        workspace.create_file("lib/scala-compiler-2.12.15.jar", "compiler 2.12.15");
        workspace.create_file("lib/scala-library-2.12.15.jar", "library 2.12.15");
        workspace.create_file("lib/scala-reflect-2.12.15.jar", "reflect 2.12.15");
        workspace.create_file("home/.keep", "");
        workspace.install_fake_java();

        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn java(&self) -> PathBuf {
        self.path().join("bin/java")
    }

    pub fn create_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path().join(path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(&file_path, content).unwrap();
        file_path
    }

    fn install_fake_java(&self) {
        let java = self.create_file("bin/java", FAKE_JAVA);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&java).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&java, perms).unwrap();
        }
    }

    /// Invocations of the fake launcher so far
    pub fn java_invocations(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("java.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The bridgeboot binary, isolated to this workspace
    pub fn bridgeboot(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_bridgeboot"));
        cmd.current_dir(self.path());
        cmd.env("HOME", self.path().join("home"));
        cmd.env("FAKE_JAVA_LOG", self.path().join("java.log"));
        cmd.env_remove("BRIDGEBOOT_CONFIG");
        cmd.env_remove("BRIDGEBOOT_CACHE_DIR");
        cmd.env_remove("BRIDGEBOOT_JAVA");
        cmd.env_remove("BRIDGEBOOT_LOG_LEVEL");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Arguments of a complete, valid bootstrap request
    pub fn bootstrap_args(&self) -> Vec<String> {
        let p = |rel: &str| self.path().join(rel).display().to_string();
        vec![
            "bootstrap".to_string(),
            "--compiler-bridge-src".to_string(),
            p("bridge"),
            "--compiler-interface".to_string(),
            p("lib/compiler-interface.jar"),
            "--scala-version".to_string(),
            "2.12.15".to_string(),
            "--scala-compiler".to_string(),
            p("lib/scala-compiler-2.12.15.jar"),
            "--scala-library".to_string(),
            p("lib/scala-library-2.12.15.jar"),
            "--scala-reflect".to_string(),
            p("lib/scala-reflect-2.12.15.jar"),
            "--cache-dir".to_string(),
            self.cache_dir().display().to_string(),
            "--java".to_string(),
            self.java().display().to_string(),
        ]
    }

    /// `bridgeboot bootstrap` with valid arguments plus `extra`
    pub fn bootstrap(&self, extra: &[&str]) -> Command {
        let mut cmd = self.bridgeboot();
        cmd.args(self.bootstrap_args());
        cmd.args(extra);
        cmd
    }

    /// Entry directories currently published in the cache
    pub fn published_entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = fs::read_dir(self.cache_dir().join("bridges"))
            .map(|dir| {
                dir.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }

    pub fn staging_is_empty(&self) -> bool {
        fs::read_dir(self.cache_dir().join("staging"))
            .map(|mut dir| dir.next().is_none())
            .unwrap_or(true)
    }
}

/// Trimmed stdout of a successful run
pub fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
}
