//! pocket-cli/src/lib.rs — the `pocket` binary's actual logic (§6.5 CLI,
//! explicitly "minimal; not core").
//!
//! Three modes, matching what §6.5 actually asks for: run a file,
//! evaluate `-c "source"`, or fall into an interactive REPL when neither
//! is given.

mod host;

use std::io::Write as _;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use host::CliHost;
use pocket_core::heap::{FnBody, Heap, Obj};
use pocket_vm::{Vm, VmConfig};

/// `pocket file.pk [args...]`, `pocket -c "source"`, or `pocket` for a REPL.
#[derive(Parser, Debug)]
#[command(name = "pocket", about = "PocketLang bytecode interpreter", disable_version_flag = true)]
struct Cli {
    /// Print version (§6.5: "-v/--version").
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Script to run. Omit (with no `-c` either) to start a REPL.
    file: Option<Utf8PathBuf>,

    /// Arguments passed through to the script. PocketLang has no
    /// standardized argv binding (§6.5 leaves the CLI unspecified beyond
    /// `file [args]`), so these are accepted for command-line
    /// compatibility but not yet exposed to running scripts.
    script_args: Vec<String>,

    /// Evaluate `source` directly instead of reading a file.
    #[arg(short = 'c', long = "command", value_name = "source")]
    command: Option<String>,

    /// Disassemble the compiled bytecode instead of running it.
    #[arg(short = 'd', long = "dump")]
    dump: bool,

    /// Compile with the tail-call rewrite disabled (§4.6 `CompileOptions`).
    #[arg(long)]
    debug: bool,

    /// Emit a `tracing` event per dispatched opcode (expensive).
    #[arg(long)]
    trace: bool,
}

/// Entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt().with_env_filter("pocket_vm=trace").init();
    } else {
        tracing_subscriber::fmt::init();
    }

    match (&cli.file, &cli.command) {
        (Some(path), _) => run_file(&cli, path),
        (None, Some(src)) => run_source(&cli, src, "-c", Utf8PathBuf::from(".")),
        (None, None) => repl(&cli),
    }
}

fn run_file(cli: &Cli, path: &Utf8Path) -> Result<()> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let root = path.parent().map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
    let name = path.file_stem().unwrap_or("main");
    run_source(cli, &source, name, root)
}

fn run_source(cli: &Cli, source: &str, name: &str, root: Utf8PathBuf) -> Result<()> {
    let mut vm = Vm::with_config(VmConfig::default());
    vm.set_host(Box::new(CliHost::new(root, cli.debug)));

    let options = pocket_compiler::CompileOptions { debug: cli.debug };
    let module = pocket_compiler::compile_str(vm.heap_mut(), source, name, options)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if cli.dump {
        print!("{}", dump_module(vm.heap(), module));
        return Ok(());
    }

    match vm.run_module(module) {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}

/// Disassembles a module's `@main` body plus every nested function stored
/// in its constant pool (§4.4: every `def` becomes a `Value::Obj(FnRef)`
/// constant referenced by `PUSH_CLOSURE`, so the module's own constant
/// pool is a complete function list — nothing deeper to recurse into).
fn dump_module(heap: &Heap, module: pocket_core::heap::ObjRef) -> String {
    let Some(Obj::Module(m)) = heap.get(module) else {
        return String::new();
    };
    let resolve_const = |ix: u16| m.constants.get(ix as usize).map(|v| heap_debug_value(heap, v));
    let resolve_name = |ix: u16| m.names.get(ix as usize).cloned();
    let mut out = String::new();
    if let Some(body) = m.body {
        out.push_str(&dump_fn(heap, body, "@main", &resolve_const, &resolve_name));
    }
    for c in &m.constants {
        if let pocket_core::value::Value::Obj(r) = c {
            if let Some(Obj::Fn(f)) = heap.get(*r) {
                out.push_str(&dump_fn(heap, *r, &f.name, &resolve_const, &resolve_name));
            }
        }
    }
    out
}

fn dump_fn(
    heap: &Heap,
    fn_ref: pocket_core::heap::ObjRef,
    name: &str,
    resolve_const: &dyn Fn(u16) -> Option<String>,
    resolve_name: &dyn Fn(u16) -> Option<String>,
) -> String {
    let Some(Obj::Fn(f)) = heap.get(fn_ref) else {
        return String::new();
    };
    let FnBody::Bytecode { opcodes, oplines, .. } = &f.body else {
        return format!("== {name} (native) ==\n");
    };
    format!(
        "== {name} ==\n{}\n",
        pocket_bytecode::disassemble(opcodes, oplines, Some(resolve_const), Some(resolve_name))
    )
}

fn heap_debug_value(heap: &Heap, v: &pocket_core::value::Value) -> String {
    match v {
        pocket_core::value::Value::Obj(r) => match heap.get(*r) {
            Some(Obj::Str(s)) => format!("{:?}", s.as_str()),
            Some(Obj::Fn(f)) => format!("<fn {}>", f.name),
            _ => "<obj>".to_string(),
        },
        other => format!("{other:?}"),
    }
}

/// A minimal line-buffered REPL: each line is compiled and run as its own
/// module named `<repl:N>`, globals from earlier lines are lost between
/// them (PocketLang modules don't share a global namespace across distinct
/// `compile_str` calls) — a real persistent-session REPL would need
/// `pocket-compiler` to support incremental compilation into one module,
/// which isn't part of this pass.
fn repl(cli: &Cli) -> Result<()> {
    println!("pocket {} — type an expression, Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
    let mut line = String::new();
    let mut counter: usize = 0;
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        line.clear();
        let n = std::io::stdin().read_line(&mut line).context("reading stdin")?;
        if n == 0 {
            println!();
            return Ok(());
        }
        let src = line.trim_end();
        if src.is_empty() {
            continue;
        }
        counter += 1;
        let name = format!("<repl:{counter}>");
        let mut vm = Vm::with_config(VmConfig::default());
        vm.set_host(Box::new(CliHost::new(Utf8PathBuf::from("."), cli.debug)));
        let options = pocket_compiler::CompileOptions { debug: cli.debug };
        match pocket_compiler::compile_str(vm.heap_mut(), src, &name, options) {
            Ok(module) => match vm.run_module(module) {
                Ok(v) => println!("{}", vm.display(v)),
                Err(e) => eprintln!("error: {e}"),
            },
            Err(e) => eprintln!("error: {e}"),
        }
    }
}
