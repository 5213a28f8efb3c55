// ABOUTME: CLI entry point — `reed compile`/`reed repl`/`reed serve`, wiring
// the library's pipeline stages and REPL driver together.

mod highlighter;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use highlighter::LispHelper;
use reed::analyzer::{self, Ctx, Expr};
use reed::config::{self, SessionConfig};
use reed::driver::host::{FsProjectLoader, HostCompiler, MockHostCompiler, ProcessHostCompiler, ProjectLoader};
use reed::driver::watch::{self, PollingWatcher};
use reed::driver::wire::{self, SessionTable};
use reed::driver::Session;
use reed::emitter::{self, EmitCtx, EmitScope, Mode};
use reed::macroexpand::primitives::PrimitiveTable;
use reed::macroexpand::MacroRegistry;
use reed::reader;
use rustyline::error::ReadlineError;
use rustyline::{Config as RlConfig, Editor};

/// A Lisp-family compiler and REPL that transpiles to C#
#[derive(Parser, Debug)]
#[command(name = "reed")]
#[command(version = config::VERSION)]
#[command(about = "A Lisp-family compiler and REPL that transpiles to C#")]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transpile a source file to its target-language form without running it
    Compile {
        /// Source file to transpile
        file: PathBuf,
        /// Write the generated source here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Namespace the file's forms are analyzed against before any `ns` form runs
        #[arg(long, default_value = "user")]
        ns: String,
    },
    /// Start an interactive REPL session (default when no subcommand is given)
    Repl {
        #[arg(long, default_value = "user")]
        ns: String,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Run the bencoded TCP wire server (spec.md §6)
    Serve {
        /// Listen port; 0 picks an ephemeral port
        #[arg(long, default_value_t = 0)]
        port: u16,
        /// Roots searched to resolve a namespace to a source file (repeatable)
        #[arg(long = "source-path", value_name = "DIR", action = clap::ArgAction::Append)]
        source_paths: Vec<PathBuf>,
        /// Directories scanned for file changes (repeatable)
        #[arg(long = "watch-path", value_name = "DIR", action = clap::ArgAction::Append)]
        watch_paths: Vec<PathBuf>,
        /// Start the watcher on session open
        #[arg(long)]
        enable_watching: bool,
        /// Reload on file change without an explicit request
        #[arg(long)]
        auto_reload: bool,
        #[arg(long, default_value = "user")]
        ns: String,
        #[arg(long)]
        verbose: bool,
        #[command(flatten)]
        host: HostArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct HostArgs {
    /// External command to invoke as the host compiler (spec.md §1's "black
    /// box"); if omitted, runs in transpile-only mode (nothing is executed)
    #[arg(long = "host-cmd", value_name = "CMD")]
    host_cmd: Option<String>,
    /// Extra argument passed to `--host-cmd` (repeatable)
    #[arg(long = "host-arg", value_name = "ARG", action = clap::ArgAction::Append)]
    host_args: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    match args.command {
        Some(Command::Compile { file, out, ns }) => run_compile(&file, out, ns),
        Some(Command::Repl { ns, host }) => run_repl(ns, host),
        Some(Command::Serve {
            port,
            source_paths,
            watch_paths,
            enable_watching,
            auto_reload,
            ns,
            verbose,
            host,
        }) => run_serve(build_serve_config(port, source_paths, watch_paths, enable_watching, auto_reload, ns, verbose), host),
        None => run_repl("user".to_string(), HostArgs { host_cmd: None, host_args: Vec::new() }),
    }
}

fn build_serve_config(
    port: u16,
    source_paths: Vec<PathBuf>,
    watch_paths: Vec<PathBuf>,
    enable_watching: bool,
    auto_reload: bool,
    initial_namespace: String,
    verbose: bool,
) -> SessionConfig {
    let source_paths = if source_paths.is_empty() { vec![PathBuf::from("./src")] } else { source_paths };
    let watch_paths = if watch_paths.is_empty() { source_paths.clone() } else { watch_paths };
    SessionConfig {
        watch_paths,
        source_paths,
        enable_watching,
        auto_reload,
        initial_namespace,
        port,
        verbose,
    }
}

fn build_host(host: &HostArgs) -> Rc<dyn HostCompiler> {
    match &host.host_cmd {
        Some(cmd) => Rc::new(ProcessHostCompiler::new(cmd.clone(), host.host_args.clone())),
        None => {
            eprintln!("no --host-cmd configured; running in transpile-only mode (forms emit their target-language form but are not executed)");
            Rc::new(MockHostCompiler::new())
        }
    }
}

/// Transpiles every form in `file` to its emitted source, in source order,
/// without invoking a host compiler (spec.md's data-flow diagram stops at
/// "host compiler", which is explicitly out of scope).
fn run_compile(file: &PathBuf, out: Option<PathBuf>, initial_ns: String) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(file).map_err(|e| format!("cannot read {}: {e}", file.display()))?;
    let forms = reader::read_all(&source)?;
    let registry = MacroRegistry::new();
    let table = PrimitiveTable::new();
    let mut current_ns = initial_ns;
    let mut output = String::new();

    for form in &forms {
        let mut ctx = Ctx::new(&registry, &table, current_ns.clone());
        let expr = analyzer::analyze(form, &mut ctx, true)?;
        match &expr {
            Expr::Ns(ns_expr) => current_ns = ns_expr.name.clone(),
            Expr::InNs(name) => current_ns = name.clone(),
            _ => {}
        }
        let emit_ctx = EmitCtx::new();
        let rendered = emitter::emit(&expr, Mode::Statement, &emit_ctx, &EmitScope::new());
        if !rendered.is_empty() {
            output.push_str(&rendered);
            output.push('\n');
        }
    }

    match out {
        Some(path) => std::fs::write(&path, output).map_err(|e| format!("cannot write {}: {e}", path.display()))?,
        None => print!("{output}"),
    }
    Ok(())
}

fn run_repl(ns: String, host: HostArgs) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new(build_host(&host), ns);

    let rl_config = RlConfig::builder().auto_add_history(true).build();
    let mut rl = Editor::with_config(rl_config).map_err(|e| format!("failed to initialize REPL: {e}"))?;
    rl.set_helper(Some(LispHelper::new()));

    let history_file = ".reed_history";
    let _ = rl.load_history(history_file);

    println!("{}", config::WELCOME_MESSAGE);
    println!("{}", config::WELCOME_SUBTITLE);

    loop {
        let prompt = format!("{}=> ", session.current_namespace());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    "(quit)" | "(exit)" => {
                        println!("Goodbye!");
                        break;
                    }
                    "(clear)" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    "(help)" => {
                        println!("{}", config::HELP_TEXT);
                        continue;
                    }
                    _ => {}
                }

                match session.eval(&line) {
                    Ok(outcome) => {
                        if !outcome.stdout.is_empty() {
                            print!("{}", outcome.stdout);
                        }
                        for value in outcome.values {
                            println!("=> {value}");
                        }
                    }
                    Err(e) => {
                        let frame = e.to_wire_frame();
                        eprintln!("{}: {}", frame.kind, frame.message);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                session.interrupt();
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}

const SOURCE_EXTENSION: &str = "cljr";

fn run_serve(config: SessionConfig, host: HostArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", config.port))?;
    println!("reed serve listening on {}", listener.local_addr()?);

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                eprintln!("accept error: {e}");
                continue;
            }
        };
        let config = config.clone();
        let host = host.clone();
        std::thread::spawn(move || handle_connection(stream, config, host));
    }
    Ok(())
}

/// One TCP connection's whole lifetime, including its own `SessionTable` —
/// sessions are scoped to the connection that created them (see DESIGN.md
/// "Thread-per-connection session scope").
fn handle_connection(mut stream: TcpStream, config: SessionConfig, host: HostArgs) {
    if let Err(e) = stream.set_read_timeout(Some(Duration::from_millis(250))) {
        eprintln!("failed to set read timeout: {e}");
        return;
    }

    let loader: Rc<dyn ProjectLoader> = Rc::new(FsProjectLoader {
        source_paths: config.source_paths.clone(),
        extension: SOURCE_EXTENSION.to_string(),
    });
    let table = SessionTable::new(build_host(&host), loader, config.clone());
    let default_session = table.create_session();
    let watcher = PollingWatcher::new(config.watch_paths.clone());
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut watching = config.enable_watching;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                while let Some(end) = wire::split_first_value(&buf) {
                    let frame: Vec<u8> = buf.drain(..end).collect();
                    match wire::decode(&frame) {
                        Ok(req) => {
                            if req.op == "watch-start" {
                                watching = true;
                            } else if req.op == "watch-stop" {
                                watching = false;
                            }
                            for response in table.handle(req) {
                                if let Ok(bytes) = wire::encode(&response) {
                                    if stream.write_all(&bytes).is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            if config.verbose {
                                eprintln!("malformed request: {e}");
                            }
                        }
                    }
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(_) => break,
        }

        if watching && (config.auto_reload || table.is_watching()) {
            let changed = watcher.poll_changes();
            if !changed.is_empty() {
                let known = table.namespaces_for(&default_session);
                let hits = watch::changed_namespaces(&changed, &known, &config.source_paths, SOURCE_EXTENSION);
                for ns in hits {
                    if let Some(report) = table.trigger_reload(&default_session, &ns, Instant::now()) {
                        if config.verbose {
                            println!("reloaded: {:?}", report.reloaded);
                        }
                    }
                }
            }
        }
    }
}
