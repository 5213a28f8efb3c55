// ABOUTME: Version/welcome constants and the dev-session configuration struct (spec.md §6).

use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WELCOME_MESSAGE: &str = "reed REPL";
pub const WELCOME_SUBTITLE: &str = "A Lisp-to-C# compiler and live host-compile session";

/// Options governing a dev REPL session (spec.md §6 "Configuration options").
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directories scanned for file changes.
    pub watch_paths: Vec<PathBuf>,
    /// Roots searched to resolve a namespace to a source file.
    pub source_paths: Vec<PathBuf>,
    /// Start the watcher on session open.
    pub enable_watching: bool,
    /// Reload on file change without an explicit request.
    pub auto_reload: bool,
    /// Namespace loaded at session start.
    pub initial_namespace: String,
    /// Listen port; 0 = ephemeral.
    pub port: u16,
    /// Emit reload log lines.
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            watch_paths: vec![PathBuf::from("./src")],
            source_paths: vec![PathBuf::from("./src")],
            enable_watching: false,
            auto_reload: false,
            initial_namespace: "user".to_string(),
            port: 0,
            verbose: false,
        }
    }
}

/// Minimum debounce window for file-watch reload triggers (spec.md §4.5/§5).
pub const RELOAD_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(400);

pub const HELP_TEXT: &str = r#"
Available REPL commands:
  (quit) or (exit)     - Exit the REPL
  (clear)               - Clear the screen
  *ns*, *1, *2, *3       - Current namespace / result history

Type any source-language form to evaluate it against the live host session.
"#;
