/// Bootstrap settings
///
/// Turns raw `bootstrap` arguments plus the loaded configuration into an
/// immutable, validated [`Settings`] record. Validation never stops at the
/// first problem: every error is collected so a misconfigured build reports
/// all of them at once. Arguments after `--` are returned as residual.
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::BootstrapArgs;
use crate::config::{expand_home, parse_duration, BridgebootConfig};
use crate::fingerprint::fingerprint_path;

/// An input file (or directory) together with its content fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub digest: String,
}

impl InputFile {
    pub fn fingerprint(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            digest: fingerprint_path(path)?,
        })
    }
}

/// The target Scala compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalaSettings {
    pub version: String,
    pub compiler: InputFile,
    pub library: InputFile,
    pub reflect: Option<InputFile>,
    /// Sorted, deduplicated
    pub abi_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub lock_stale_after: Duration,
    pub lock_poll_interval: Duration,
}

/// How the bridge is produced on a cache miss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Compile the bridge sources with the target compiler
    Compile,
    /// Copy a prebuilt bridge jar
    Prebuilt(InputFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub strategy: BuildStrategy,
    pub java: String,
    pub jvm_options: Vec<String>,
    pub compiler_options: Vec<String>,
    pub timeout: Option<Duration>,
}

/// Validated bootstrap settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub compiler_bridge_src: InputFile,
    pub compiler_interface: InputFile,
    pub scala: ScalaSettings,
    pub out: Option<PathBuf>,
    pub cache: CacheSettings,
    pub build: BuildSettings,
}

/// Result of parsing: settings only when `errors` is empty
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub settings: Option<Settings>,
    pub residual: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone, Copy)]
enum InputKind {
    File,
    FileOrDir,
}

impl Settings {
    /// Parse raw `bootstrap` arguments (without the program name)
    pub fn parse<I, T>(args: I, config: &BridgebootConfig) -> ParseOutcome
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let argv = std::iter::once(OsString::from("bootstrap"))
            .chain(args.into_iter().map(Into::into));

        match BootstrapArgs::try_parse_from(argv) {
            Ok(args) => Self::from_args(args, config),
            Err(e) => ParseOutcome {
                settings: None,
                residual: Vec::new(),
                errors: vec![e.to_string().trim().to_string()],
            },
        }
    }

    /// Validate already-parsed arguments against the configuration
    pub fn from_args(args: BootstrapArgs, config: &BridgebootConfig) -> ParseOutcome {
        let mut errors = Vec::new();

        let bridge_src = required_input(
            &mut errors,
            "--compiler-bridge-src",
            args.compiler_bridge_src.as_deref(),
            InputKind::FileOrDir,
        );
        let interface = required_input(
            &mut errors,
            "--compiler-interface",
            args.compiler_interface.as_deref(),
            InputKind::File,
        );
        let compiler = required_input(
            &mut errors,
            "--scala-compiler",
            args.scala_compiler.as_deref(),
            InputKind::File,
        );
        let library = required_input(
            &mut errors,
            "--scala-library",
            args.scala_library.as_deref(),
            InputKind::File,
        );
        let reflect = args
            .scala_reflect
            .as_deref()
            .and_then(|p| required_input(&mut errors, "--scala-reflect", Some(p), InputKind::File));
        let prebuilt = args
            .prebuilt
            .as_deref()
            .and_then(|p| required_input(&mut errors, "--prebuilt", Some(p), InputKind::File));

        let version = match args.scala_version.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("missing required --scala-version".to_string());
                None
            }
            Some(v) if !is_valid_version(v) => {
                errors.push(format!("invalid --scala-version '{}'", v));
                None
            }
            Some(v) => Some(v.to_string()),
        };

        let timeout = match args.timeout.as_ref().or(config.build.timeout.as_ref()) {
            Some(t) => match parse_duration(t) {
                Ok(d) if d.is_zero() => {
                    errors.push("--timeout must be greater than zero".to_string());
                    None
                }
                Ok(d) => Some(d),
                Err(e) => {
                    errors.push(format!("invalid --timeout '{}': {}", t, e));
                    None
                }
            },
            None => None,
        };

        let lock_stale_after = config_duration(
            &mut errors,
            "cache.lock_stale_after",
            &config.cache.lock_stale_after,
        );
        let lock_poll_interval = config_duration(
            &mut errors,
            "cache.lock_poll_interval",
            &config.cache.lock_poll_interval,
        );

        let java = args.java.unwrap_or_else(|| config.build.java.clone());
        if java.trim().is_empty() {
            errors.push("--java must not be empty".to_string());
        }

        let mut compiler_options = config.build.compiler_options.clone();
        compiler_options.extend(args.compiler_options);

        if prebuilt.is_some() && !compiler_options.is_empty() {
            errors.push("--compiler-option has no effect together with --prebuilt".to_string());
        }

        let out = args.out.as_deref().map(expand_home);
        if let Some(out) = &out {
            let inputs = [&bridge_src, &interface, &compiler, &library];
            if inputs.into_iter().flatten().any(|i| &i.path == out) {
                errors.push(format!("--out would overwrite an input: {}", out.display()));
            }
        }

        let cache_dir = args
            .cache_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| config.cache_dir());

        let mut abi_flags = args.abi_flags;
        abi_flags.sort();
        abi_flags.dedup();

        let residual = args.residual;

        let (
            Some(compiler_bridge_src),
            Some(compiler_interface),
            Some(compiler),
            Some(library),
            Some(version),
            Some(lock_stale_after),
            Some(lock_poll_interval),
        ) = (
            bridge_src,
            interface,
            compiler,
            library,
            version,
            lock_stale_after,
            lock_poll_interval,
        )
        else {
            return ParseOutcome {
                settings: None,
                residual,
                errors,
            };
        };

        if !errors.is_empty() {
            return ParseOutcome {
                settings: None,
                residual,
                errors,
            };
        }

        let strategy = match prebuilt {
            Some(jar) => BuildStrategy::Prebuilt(jar),
            None => BuildStrategy::Compile,
        };

        ParseOutcome {
            settings: Some(Settings {
                compiler_bridge_src,
                compiler_interface,
                scala: ScalaSettings {
                    version,
                    compiler,
                    library,
                    reflect,
                    abi_flags,
                },
                out,
                cache: CacheSettings {
                    dir: cache_dir,
                    lock_stale_after,
                    lock_poll_interval,
                },
                build: BuildSettings {
                    strategy,
                    java,
                    jvm_options: config.build.jvm_options.clone(),
                    compiler_options,
                    timeout,
                },
            }),
            residual,
            errors,
        }
    }
}

fn required_input(
    errors: &mut Vec<String>,
    flag: &str,
    value: Option<&str>,
    kind: InputKind,
) -> Option<InputFile> {
    let Some(raw) = value else {
        errors.push(format!("missing required {}", flag));
        return None;
    };

    let path = expand_home(raw);
    if !path.exists() {
        errors.push(format!("{} does not exist: {}", flag, path.display()));
        return None;
    }
    if matches!(kind, InputKind::File) && !path.is_file() {
        errors.push(format!("{} is not a file: {}", flag, path.display()));
        return None;
    }

    match InputFile::fingerprint(&path) {
        Ok(input) => Some(input),
        Err(e) => {
            errors.push(format!("{} could not be read: {:#}", flag, e));
            None
        }
    }
}

fn config_duration(errors: &mut Vec<String>, name: &str, value: &str) -> Option<Duration> {
    match parse_duration(value) {
        Ok(d) => Some(d),
        Err(e) => {
            errors.push(format!("invalid {} '{}': {}", name, value, e));
            None
        }
    }
}

/// Versions end up in cache keys and directory names
fn is_valid_version(version: &str) -> bool {
    version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
}
