//! The CLI flag surface, concretized from the distilled spec's contract
//! (debug mode, stdin disable, filesystem-write disable, a config-blob
//! flag, a positional script path) via `clap`'s derive API, in the
//! teacher's `common_args.rs` style of small, independently documented
//! flags rather than one monolithic options struct.

use clap::Parser;

/// Runs a single script as a one-shot process, an HTTP server, or a
/// worker — the mode is entirely up to what the script itself calls
/// (`server(...).start()`, `spawn(...)`, or neither).
#[derive(Debug, Parser)]
#[command(name = "duso", version, about = "Run a duso script")]
pub struct Cli {
    /// Enables debug mode: `breakpoint()`/`watch()` open a live REPL
    /// instead of being no-ops.
    #[arg(long)]
    pub debug: bool,

    /// Disables `input()`; it raises a runtime error instead of reading
    /// from stdin. Useful under a supervisor where stdin isn't a TTY.
    #[arg(long)]
    pub no_stdin: bool,

    /// Restricts VFS writes to `/STORE/`; writes to real OS paths are
    /// rejected.
    #[arg(long)]
    pub no_fs_writes: bool,

    /// A free-form configuration blob, parsed as JSON if it parses as
    /// JSON, otherwise as `key=value` pairs separated by `,`, and made
    /// available to scripts under `datastore("sys").get("config")`.
    #[arg(long, value_name = "BLOB")]
    pub config: Option<String>,

    /// Additional module search directories, prepended ahead of
    /// `DUSO_LIB` entries. Repeatable.
    #[arg(long = "lib", value_name = "DIR")]
    pub lib_dirs: Vec<String>,

    /// The script to run.
    pub script: String,

    /// Arguments forwarded to the script, after a literal `--`.
    #[arg(last = true)]
    pub script_args: Vec<String>,
}
