// ABOUTME: Trait boundary for the injectable external capability the driver
// depends on but never implements directly: the actual host compiler and
// source-file resolution. Grounded on the teacher's `Tool` trait
// (`src/tools.rs`) — a narrow, `Send + Sync` trait wrapping one external
// capability — generalized here to two capabilities with mock test doubles,
// since no real host toolchain exists to drive against.

use std::collections::HashMap;

use crate::error::HostCompileError;

/// One artifact produced by compiling a continuation script or a type's
/// independent compile unit against the host toolchain.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub source: String,
    /// Result values reported back per spec.md §4.5 step 4's eval contract,
    /// already rendered as display text (the driver has no use for the raw
    /// host runtime value beyond printing it).
    pub values: Vec<String>,
    pub stdout: String,
}

/// The capability to turn emitted C# source into a loaded, runnable
/// artifact. A real implementation shells out to (or embeds) the host
/// toolchain; this crate only ships `MockHostCompiler` since no such
/// toolchain is available to drive against here.
pub trait HostCompiler: Send + Sync {
    /// Compiles and loads an independent unit (a type/protocol/record
    /// definition, spec.md §4.5 step 3).
    fn compile_unit(&self, source: &str) -> Result<(), HostCompileError>;

    /// Compiles, loads, and runs a continuation script (spec.md §4.5 step
    /// 4), returning its produced values and captured stdout.
    fn run_continuation(&self, source: &str) -> Result<CompiledUnit, HostCompileError>;
}

/// The capability to resolve a namespace to its source text (spec.md §6
/// "source-file convention"). A real implementation walks `source-paths`
/// on disk; this crate ships `MockProjectLoader` (an in-memory map) for
/// tests, and `FsProjectLoader` (below) for the real on-disk layout.
pub trait ProjectLoader: Send + Sync {
    fn load_namespace_source(&self, ns: &str) -> std::io::Result<String>;
}

/// Mangles a namespace into its source-file-relative path: `-` becomes `_`
/// per path segment (spec.md §6).
pub fn namespace_to_relative_path(ns: &str, extension: &str) -> std::path::PathBuf {
    let mut path = std::path::PathBuf::new();
    for seg in ns.split('.') {
        path.push(seg.replace('-', "_"));
    }
    path.set_extension(extension.trim_start_matches('.'));
    path
}

/// Resolves a namespace against a list of source roots, trying each in
/// order (spec.md §6 "source-paths: roots searched to resolve a namespace
/// to a file").
pub struct FsProjectLoader {
    pub source_paths: Vec<std::path::PathBuf>,
    pub extension: String,
}

impl ProjectLoader for FsProjectLoader {
    fn load_namespace_source(&self, ns: &str) -> std::io::Result<String> {
        let rel = namespace_to_relative_path(ns, &self.extension);
        for root in &self.source_paths {
            let candidate = root.join(&rel);
            if candidate.exists() {
                return std::fs::read_to_string(candidate);
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no source file for namespace {ns} under configured source-paths"),
        ))
    }
}

/// In-memory stand-in for the host toolchain, used by tests and by any
/// environment with no real host compiler wired in. `compile_unit` records
/// every source it's handed; `run_continuation` looks up a scripted
/// response by exact source match, falling back to an empty success.
#[derive(Default)]
pub struct MockHostCompiler {
    pub compiled_units: std::cell::RefCell<Vec<String>>,
    pub scripted_responses: HashMap<String, Result<CompiledUnit, HostCompileError>>,
    pub fail_all: bool,
}

impl MockHostCompiler {
    pub fn new() -> Self {
        MockHostCompiler::default()
    }

    pub fn with_scripted_response(mut self, source: impl Into<String>, response: Result<CompiledUnit, HostCompileError>) -> Self {
        self.scripted_responses.insert(source.into(), response);
        self
    }
}

impl HostCompiler for MockHostCompiler {
    fn compile_unit(&self, source: &str) -> Result<(), HostCompileError> {
        if self.fail_all {
            return Err(HostCompileError::Diagnostics {
                diagnostics: vec!["mock host compiler configured to fail".to_string()],
            });
        }
        self.compiled_units.borrow_mut().push(source.to_string());
        Ok(())
    }

    fn run_continuation(&self, source: &str) -> Result<CompiledUnit, HostCompileError> {
        if self.fail_all {
            return Err(HostCompileError::Diagnostics {
                diagnostics: vec!["mock host compiler configured to fail".to_string()],
            });
        }
        if let Some(scripted) = self.scripted_responses.get(source) {
            return scripted.clone();
        }
        Ok(CompiledUnit {
            source: source.to_string(),
            values: Vec::new(),
            stdout: String::new(),
        })
    }
}

/// In-memory namespace source map, for tests that exercise reload without
/// touching the filesystem.
#[derive(Default)]
pub struct MockProjectLoader {
    pub sources: HashMap<String, String>,
}

impl MockProjectLoader {
    pub fn new() -> Self {
        MockProjectLoader::default()
    }

    pub fn with_source(mut self, ns: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(ns.into(), source.into());
        self
    }
}

impl ProjectLoader for MockProjectLoader {
    fn load_namespace_source(&self, ns: &str) -> std::io::Result<String> {
        self.sources
            .get(ns)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no mock source for namespace {ns}")))
    }
}

/// Shells out to an operator-configured external command, treating the
/// host compiler strictly as the black box spec.md §1 describes it as: the
/// emitted source is piped to the command's stdin, its stdout is read back
/// as one value per line. No assumption about a particular toolchain
/// (`csc`/`dotnet`/Roslyn) is baked in here — the command is entirely
/// supplied by whoever configures the session.
pub struct ProcessHostCompiler {
    pub command: String,
    pub args: Vec<String>,
}

impl ProcessHostCompiler {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        ProcessHostCompiler {
            command: command.into(),
            args,
        }
    }

    fn invoke(&self, source: &str) -> Result<CompiledUnit, HostCompileError> {
        use std::io::Write;

        let mut child = std::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| HostCompileError::Diagnostics {
                diagnostics: vec![format!("failed to launch host compiler `{}`: {e}", self.command)],
            })?;

        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(source.as_bytes())
            .map_err(|e| HostCompileError::Diagnostics {
                diagnostics: vec![format!("failed to write to host compiler stdin: {e}")],
            })?;

        let output = child.wait_with_output().map_err(|e| HostCompileError::Diagnostics {
            diagnostics: vec![format!("host compiler process failed: {e}")],
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostCompileError::Diagnostics {
                diagnostics: stderr.lines().map(|s| s.to_string()).collect(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(CompiledUnit {
            source: source.to_string(),
            values: stdout.lines().map(|s| s.to_string()).collect(),
            stdout: String::new(),
        })
    }
}

impl HostCompiler for ProcessHostCompiler {
    fn compile_unit(&self, source: &str) -> Result<(), HostCompileError> {
        self.invoke(source).map(|_| ())
    }

    fn run_continuation(&self, source: &str) -> Result<CompiledUnit, HostCompileError> {
        self.invoke(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_path_mangles_hyphens_per_segment() {
        let path = namespace_to_relative_path("my-app.http-client", "cljr");
        assert_eq!(path, std::path::PathBuf::from("my_app/http_client.cljr"));
    }

    #[test]
    fn mock_compiler_records_compiled_units() {
        let host = MockHostCompiler::new();
        host.compile_unit("class Foo {}").unwrap();
        assert_eq!(host.compiled_units.borrow().len(), 1);
    }

    #[test]
    fn mock_compiler_can_be_scripted_to_fail() {
        let host = MockHostCompiler {
            fail_all: true,
            ..MockHostCompiler::new()
        };
        assert!(host.compile_unit("whatever").is_err());
    }

    #[test]
    fn mock_loader_returns_not_found_for_unknown_namespace() {
        let loader = MockProjectLoader::new().with_source("user", "(ns user)");
        assert!(loader.load_namespace_source("user").is_ok());
        assert!(loader.load_namespace_source("other").is_err());
    }

    #[test]
    fn process_host_compiler_round_trips_through_cat() {
        let host = ProcessHostCompiler::new("cat", vec![]);
        let unit = host.run_continuation("class Foo {}\n").unwrap();
        assert_eq!(unit.values, vec!["class Foo {}".to_string()]);
    }

    #[test]
    fn process_host_compiler_reports_diagnostics_on_nonzero_exit() {
        let host = ProcessHostCompiler::new("false", vec![]);
        assert!(host.compile_unit("whatever").is_err());
    }
}
