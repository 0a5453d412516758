/// Target compiler runtime
///
/// The runtime is described by its version and the jars that make up the
/// Scala compiler. Its [`RuntimeIdentity`] is what distinguishes one
/// compiler build from another when deriving cache keys.
use std::path::PathBuf;

use crate::settings::{InputFile, Settings};

/// Identity of a compiler runtime build
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeIdentity {
    pub version: String,
    /// Sorted, deduplicated
    pub abi_flags: Vec<String>,
    /// (role, content digest) for every jar, in fixed role order
    pub jars: Vec<(String, String)>,
}

/// A resolved Scala compiler instance
#[derive(Debug, Clone)]
pub struct CompilerRuntime {
    pub version: String,
    pub compiler_jar: InputFile,
    pub library_jar: InputFile,
    pub reflect_jar: Option<InputFile>,
    pub abi_flags: Vec<String>,
}

impl CompilerRuntime {
    pub fn from_settings(settings: &Settings) -> Self {
        let scala = &settings.scala;
        Self {
            version: scala.version.clone(),
            compiler_jar: scala.compiler.clone(),
            library_jar: scala.library.clone(),
            reflect_jar: scala.reflect.clone(),
            abi_flags: scala.abi_flags.clone(),
        }
    }

    pub fn identity(&self) -> RuntimeIdentity {
        let mut jars = vec![
            ("scala-compiler".to_string(), self.compiler_jar.digest.clone()),
            ("scala-library".to_string(), self.library_jar.digest.clone()),
        ];
        if let Some(reflect) = &self.reflect_jar {
            jars.push(("scala-reflect".to_string(), reflect.digest.clone()));
        }

        let mut abi_flags = self.abi_flags.clone();
        abi_flags.sort();
        abi_flags.dedup();

        RuntimeIdentity {
            version: self.version.clone(),
            abi_flags,
            jars,
        }
    }

    /// Jars needed to run the compiler itself
    pub fn compiler_classpath(&self) -> Vec<PathBuf> {
        let mut classpath = vec![
            self.compiler_jar.path.clone(),
            self.library_jar.path.clone(),
        ];
        if let Some(reflect) = &self.reflect_jar {
            classpath.push(reflect.path.clone());
        }
        classpath
    }

    /// Jars the bridge sources compile against (besides the interface)
    pub fn library_classpath(&self) -> Vec<PathBuf> {
        // The bridge calls into the compiler API, so it needs every jar
        self.compiler_classpath()
    }
}
