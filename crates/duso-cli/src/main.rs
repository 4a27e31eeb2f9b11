//! `duso-cli`'s entry point: parses flags, builds the shared
//! [`duso_core::Runtime`] (merging in `duso-server`'s `server(...)`
//! built-in), seeds the `sys` datastore with process metrics and the
//! recognized flags, then evaluates the script path on its own
//! `spawn_blocking` task — the same "every invocation gets its own
//! dedicated blocking task" discipline `duso_core::invoke::run`/`spawn`
//! and `duso_server::dispatch::dispatch` use for every other entry point
//! into the evaluator, so the top-level script is not a special case.
//! Grounded on the teacher's `cli/src/main.rs` `#[tokio::main]` +
//! `Config::load()` shape, generalized from "parse a subcommand tree" to
//! "run one script."

mod cli;
mod config;

use clap::Parser;
use cli::Cli;
use duso_core::{Environment, PolicyFlags, Runtime, Signal};
use duso_datastore::{DatastoreConfig, Registry};
use duso_value::Value;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let registry = Arc::new(Registry::new());
    let lib_dirs = lib_search_dirs(&cli.lib_dirs);
    let policy = PolicyFlags {
        debug: cli.debug,
        no_stdin: cli.no_stdin,
        no_fs_writes: cli.no_fs_writes,
    };

    let runtime = Runtime::new(registry.clone(), lib_dirs, policy, duso_server::builtins::table());
    seed_sys_namespace(&registry, &cli);

    let loaded = match runtime.interpreter.resolver.load_path(&cli.script) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("duso: {e}");
            return ExitCode::FAILURE;
        }
    };

    let script_path = loaded.absolute_path.clone();
    let (mut evaluator, _gid) = runtime.fresh_evaluator(script_path.clone());

    let outcome = tokio::task::spawn_blocking(move || {
        let env = Environment::root();
        evaluator.eval_program(&loaded.ast, &env)
    })
    .await;

    registry.save_all();

    match outcome {
        Ok(Ok(_)) => ExitCode::SUCCESS,
        Ok(Err(Signal::Exit(v))) => exit_code_from_value(&v),
        Ok(Err(Signal::Throw(e))) => {
            eprintln!("duso: uncaught error in {script_path}: {}", e.to_display_string());
            ExitCode::FAILURE
        }
        // `break`/`continue`/`return` escaping the top level is a parser/
        // evaluator invariant violation elsewhere, not a user-facing
        // failure mode worth a distinct message here.
        Ok(Err(_)) => ExitCode::SUCCESS,
        Err(join_err) => {
            eprintln!("duso: script task panicked: {join_err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "duso=debug,info" } else { "duso=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// `--lib` entries come first, then each `DUSO_LIB` entry, matching
/// SPEC_FULL.md's "prepended ahead of `DUSO_LIB` entries."
fn lib_search_dirs(cli_lib_dirs: &[String]) -> Vec<String> {
    let mut dirs: Vec<String> = cli_lib_dirs.to_vec();
    if let Ok(from_env) = std::env::var("DUSO_LIB") {
        dirs.extend(from_env.split(':').filter(|s| !s.is_empty()).map(String::from));
    }
    dirs
}

/// Populates `sys` with process-wide metrics and the recognized CLI
/// flags, via `force_set` (the runtime-internal bypass of `sys`'s
/// read-only gate — see `duso_datastore::Datastore::force_set`),
/// matching the pattern `duso_core::invoke::spawn` and
/// `duso_server::server::Server::bump_counters` already use.
fn seed_sys_namespace(registry: &Registry, cli: &Cli) {
    let Ok(sys) = registry.get_or_create("sys", DatastoreConfig { read_only: true, ..Default::default() }) else {
        return;
    };

    sys.force_set("pid", Value::Number(std::process::id() as f64));
    sys.force_set(
        "start_time",
        Value::Number(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        ),
    );
    sys.force_set("script", Value::string(cli.script.clone()));
    sys.force_set(
        "args",
        Value::array(cli.script_args.iter().map(|a| Value::string(a.clone())).collect()),
    );
    if let Some(bytes) = process_memory_bytes() {
        sys.force_set("memory_bytes", Value::Number(bytes));
    }
    sys.force_set("spawn_count", Value::Number(0.0));
    sys.force_set("http_procs", Value::Number(0.0));

    let mut flags = duso_value::ObjectMap::new();
    flags.insert("debug".into(), Value::Boolean(cli.debug));
    flags.insert("no_stdin".into(), Value::Boolean(cli.no_stdin));
    flags.insert("no_fs_writes".into(), Value::Boolean(cli.no_fs_writes));
    sys.force_set("flags", Value::object(flags));

    if let Some(blob) = &cli.config {
        sys.force_set("config", config::parse_config_blob(blob));
    }
}

/// Best-effort resident set size from `/proc/self/statm` (pages, times
/// the page size). `None` on non-Linux targets or if the read fails —
/// `sys.memory_bytes` is simply left unset rather than reported as `0`,
/// which would read as a real measurement.
#[cfg(target_os = "linux")]
fn process_memory_bytes() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;
    Some((resident_pages * page_size) as f64)
}

#[cfg(not(target_os = "linux"))]
fn process_memory_bytes() -> Option<f64> {
    None
}

/// `exit(n)`'s numeric form as the process exit code; non-numeric
/// payloads (including `exit()` with no argument, i.e. `nil`) exit 0,
/// matching "0 on successful completion."
fn exit_code_from_value(v: &Value) -> ExitCode {
    match v.as_number() {
        Some(n) => ExitCode::from((n as i64).clamp(0, 255) as u8),
        None => ExitCode::SUCCESS,
    }
}
