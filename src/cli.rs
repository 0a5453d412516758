use clap::{Parser, Subcommand};

/// bridgeboot - compiler bridge bootstrapper
///
/// Compiles (or fetches) the compiler bridge for a specific Scala compiler
/// and keeps the result in a cache shared by every build on the machine.
#[derive(Parser, Debug)]
#[command(name = "bridgeboot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiler bridge bootstrapper with a shared artifact cache", long_about = None)]
pub struct Cli {
    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true, env = "BRIDGEBOOT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Config file path (default: nearest bridgeboot.toml)
    #[arg(short = 'c', long, global = true, env = "BRIDGEBOOT_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bootstrap the compiler bridge for a Scala compiler
    Bootstrap(BootstrapArgs),

    /// Inspect and maintain the bridge cache
    Cache(CacheArgs),

    /// Configuration management
    Config(ConfigArgs),
}

/// Arguments of `bridgeboot bootstrap`
///
/// Only syntax is checked here; `Settings::from_args` validates paths and
/// values and reports every problem at once.
#[derive(Parser, Debug, Clone, Default)]
pub struct BootstrapArgs {
    /// Compiler bridge sources (directory or single source file)
    #[arg(long, value_name = "PATH")]
    pub compiler_bridge_src: Option<String>,

    /// Compiler interface jar
    #[arg(long, value_name = "PATH")]
    pub compiler_interface: Option<String>,

    /// Version of the target Scala compiler (e.g. 2.12.15)
    #[arg(long, value_name = "VERSION")]
    pub scala_version: Option<String>,

    /// scala-compiler jar
    #[arg(long, value_name = "PATH")]
    pub scala_compiler: Option<String>,

    /// scala-library jar
    #[arg(long, value_name = "PATH")]
    pub scala_library: Option<String>,

    /// scala-reflect jar (Scala 2.10+)
    #[arg(long, value_name = "PATH")]
    pub scala_reflect: Option<String>,

    /// ABI-relevant runtime flag, repeatable
    #[arg(long = "abi-flag", value_name = "FLAG")]
    pub abi_flags: Vec<String>,

    /// Copy the bootstrapped bridge jar to this file or directory
    #[arg(long, value_name = "PATH")]
    pub out: Option<String>,

    /// Cache directory
    #[arg(long, env = "BRIDGEBOOT_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Use this prebuilt bridge jar instead of compiling
    #[arg(long, value_name = "PATH")]
    pub prebuilt: Option<String>,

    /// JVM launcher used to run the Scala compiler
    #[arg(long, env = "BRIDGEBOOT_JAVA", value_name = "EXE")]
    pub java: Option<String>,

    /// Extra Scala compiler option, repeatable
    #[arg(long = "compiler-option", value_name = "OPT", allow_hyphen_values = true)]
    pub compiler_options: Vec<String>,

    /// Maximum compilation time (e.g. 90s, 10m)
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Arguments after `--`; reported and otherwise ignored
    #[arg(last = true)]
    pub residual: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Cache directory
    #[arg(long, env = "BRIDGEBOOT_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<String>,

    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cached bridges
    List {
        /// Show build details
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show cache statistics
    Stats,

    /// Check every cached bridge against its recorded checksum
    Verify,

    /// Remove one cached bridge or all of them
    Clean {
        /// Cache key to remove
        #[arg(long, conflicts_with = "all")]
        key: Option<String>,

        /// Remove every cached bridge
        #[arg(long)]
        all: bool,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: String,
    },
    /// Print an example bridgeboot.toml
    Example,
    /// Show effective configuration (discovered or given with --config)
    Show,
}
