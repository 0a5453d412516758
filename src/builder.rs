/// Compiler bridge builders
///
/// A builder materializes the bridge jar for one cache key into a staging
/// directory owned by the artifact store. It is only ever invoked on a
/// cache miss, and at most once at a time per key.
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache_key::CompilerCacheKey;
use crate::error::BuildFailure;
use crate::fingerprint::{fingerprint_path, list_files};
use crate::logging::{operations, services};
use crate::runtime::CompilerRuntime;
use crate::settings::{BuildStrategy, InputFile, Settings};

/// File name of the bridge jar inside a cache entry
pub const ARTIFACT_FILE_NAME: &str = "compiler-bridge.jar";

/// Entry point of the Scala 2 compiler inside scala-compiler.jar
pub const SCALA_COMPILER_MAIN: &str = "scala.tools.nsc.Main";

const SOURCE_EXTENSIONS: &[&str] = &["scala", "java"];

/// Produces a bridge artifact for a key
pub trait BridgeBuilder: Send + Sync {
    /// Short human-readable description, stored in the build record
    fn describe(&self) -> String;

    /// Write the artifact below `staging_dir` and return its path
    fn build(&self, key: &CompilerCacheKey, staging_dir: &Path) -> Result<PathBuf, BuildFailure>;
}

impl<F> BridgeBuilder for F
where
    F: Fn(&CompilerCacheKey, &Path) -> Result<PathBuf, BuildFailure> + Send + Sync,
{
    fn describe(&self) -> String {
        "custom".to_string()
    }

    fn build(&self, key: &CompilerCacheKey, staging_dir: &Path) -> Result<PathBuf, BuildFailure> {
        self(key, staging_dir)
    }
}

/// Select the builder configured by `settings`
pub fn for_settings(settings: &Settings, runtime: &CompilerRuntime) -> Box<dyn BridgeBuilder> {
    match &settings.build.strategy {
        BuildStrategy::Compile => Box::new(CompilingBridgeBuilder::new(settings, runtime)),
        BuildStrategy::Prebuilt(jar) => Box::new(PrebuiltBridgeBuilder::new(jar.clone())),
    }
}

/// Compiles the bridge sources with the target Scala compiler
///
/// The compiler runs from the runtime's own jars on a JVM
/// (`java -cp <compiler jars> scala.tools.nsc.Main ...`), so the compiler
/// that produces the bridge is exactly the one the bridge will talk to.
///
/// Every input that went into the cache key is fingerprinted again once the
/// compiler exits; an edit during the build fails it instead of publishing
/// new bytes under the old key.
pub struct CompilingBridgeBuilder {
    java: String,
    jvm_options: Vec<String>,
    compiler_options: Vec<String>,
    compiler_classpath: Vec<PathBuf>,
    bridge_classpath: Vec<PathBuf>,
    sources: PathBuf,
    inputs: Vec<InputFile>,
    timeout: Option<Duration>,
    scala_version: String,
}

impl CompilingBridgeBuilder {
    pub fn new(settings: &Settings, runtime: &CompilerRuntime) -> Self {
        let mut bridge_classpath = vec![settings.compiler_interface.path.clone()];
        bridge_classpath.extend(runtime.library_classpath());

        let mut inputs = vec![
            settings.compiler_bridge_src.clone(),
            settings.compiler_interface.clone(),
            runtime.compiler_jar.clone(),
            runtime.library_jar.clone(),
        ];
        inputs.extend(runtime.reflect_jar.clone());

        Self {
            java: settings.build.java.clone(),
            jvm_options: settings.build.jvm_options.clone(),
            compiler_options: settings.build.compiler_options.clone(),
            compiler_classpath: runtime.compiler_classpath(),
            bridge_classpath,
            sources: settings.compiler_bridge_src.path.clone(),
            inputs,
            timeout: settings.build.timeout,
            scala_version: runtime.version.clone(),
        }
    }

    /// Bridge sources to pass to the compiler, sorted
    fn source_files(&self) -> Result<Vec<PathBuf>, BuildFailure> {
        if self.sources.is_file() {
            return Ok(vec![self.sources.clone()]);
        }

        let files = list_files(&self.sources).map_err(|e| BuildFailure::Io(format!("{:#}", e)))?;
        let sources: Vec<PathBuf> = files
            .into_iter()
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
            })
            .collect();

        if sources.is_empty() {
            return Err(BuildFailure::Other(format!(
                "no .scala or .java sources under {}",
                self.sources.display()
            )));
        }
        Ok(sources)
    }

    fn command(&self, output: &Path, sources: &[PathBuf]) -> Result<Command, BuildFailure> {
        let java = which::which(&self.java).unwrap_or_else(|e| {
            debug!("Could not find '{}' in PATH: {}. Trying as-is.", self.java, e);
            PathBuf::from(&self.java)
        });

        let mut cmd = Command::new(java);
        cmd.args(&self.jvm_options);
        cmd.arg("-cp").arg(join_classpath(&self.compiler_classpath)?);
        cmd.arg(SCALA_COMPILER_MAIN);
        cmd.arg("-classpath").arg(join_classpath(&self.bridge_classpath)?);
        cmd.args(&self.compiler_options);
        cmd.arg("-d").arg(output);
        cmd.args(sources);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl BridgeBuilder for CompilingBridgeBuilder {
    fn describe(&self) -> String {
        format!("compile scala {} via {}", self.scala_version, self.java)
    }

    fn build(&self, key: &CompilerCacheKey, staging_dir: &Path) -> Result<PathBuf, BuildFailure> {
        let start = Instant::now();
        let output = staging_dir.join(ARTIFACT_FILE_NAME);
        let sources = self.source_files()?;

        info!(
            service = services::BUILDER,
            operation = operations::BUILD,
            key = %key,
            source_count = sources.len(),
            "compiling compiler bridge"
        );

        let mut cmd = self.command(&output, &sources)?;
        debug!("Command: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| BuildFailure::Other(format!("failed to spawn {}: {}", self.java, e)))?;

        // Drain both pipes so a chatty compiler cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On timeout the reader threads are left detached: grandchildren may
        // still hold the pipes open
        let Some(status) = wait_with_timeout(&mut child, self.timeout)? else {
            return Err(BuildFailure::Timeout(self.timeout.unwrap_or_default()));
        };
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        if !stdout.trim().is_empty() {
            debug!("compiler output:\n{}", stdout.trim_end());
        }

        if !status.success() {
            return Err(BuildFailure::CompilerExited {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !output.is_file() {
            return Err(BuildFailure::MissingOutput(output));
        }
        verify_inputs(&self.inputs)?;

        info!(
            service = services::BUILDER,
            operation = operations::BUILD,
            key = %key,
            duration_ms = start.elapsed().as_millis() as u64,
            "compiled compiler bridge"
        );

        Ok(output)
    }
}

/// "Fetches" the bridge by copying a prebuilt jar
pub struct PrebuiltBridgeBuilder {
    source: InputFile,
}

impl PrebuiltBridgeBuilder {
    pub fn new(source: InputFile) -> Self {
        Self { source }
    }
}

impl BridgeBuilder for PrebuiltBridgeBuilder {
    fn describe(&self) -> String {
        format!("prebuilt {}", self.source.path.display())
    }

    fn build(&self, key: &CompilerCacheKey, staging_dir: &Path) -> Result<PathBuf, BuildFailure> {
        let output = staging_dir.join(ARTIFACT_FILE_NAME);

        info!(
            service = services::BUILDER,
            operation = operations::BUILD,
            key = %key,
            source = %self.source.path.display(),
            "fetching prebuilt compiler bridge"
        );

        fs::copy(&self.source.path, &output).map_err(|e| {
            BuildFailure::Io(format!("failed to copy {}: {}", self.source.path.display(), e))
        })?;
        verify_inputs(std::slice::from_ref(&self.source))?;

        Ok(output)
    }
}

/// Fail if any input no longer matches the fingerprint its key was built from
fn verify_inputs(inputs: &[InputFile]) -> Result<(), BuildFailure> {
    for input in inputs {
        let digest =
            fingerprint_path(&input.path).map_err(|e| BuildFailure::Io(format!("{:#}", e)))?;
        if digest != input.digest {
            return Err(BuildFailure::InputChanged(input.path.clone()));
        }
    }
    Ok(())
}

fn join_classpath(entries: &[PathBuf]) -> Result<OsString, BuildFailure> {
    std::env::join_paths(entries)
        .map_err(|e| BuildFailure::Other(format!("invalid classpath entry: {}", e)))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Wait for the compiler; `None` means it was killed after `timeout`
fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<Option<ExitStatus>, BuildFailure> {
    let Some(timeout) = timeout else {
        return Ok(Some(child.wait()?));
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if start.elapsed() >= timeout {
            child.kill()?;
            child.wait()?; // Reap zombie
            return Ok(None);
        }

        thread::sleep(Duration::from_millis(50));
    }
}
