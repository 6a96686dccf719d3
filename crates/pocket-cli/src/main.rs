//! Entry point for the `pocket` binary. Kept minimal on purpose — the
//! actual argument parsing and dispatch lives in `pocket_cli::run()` so it
//! can be exercised by integration tests without spawning a process.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: failed to install color-eyre: {e}");
    }

    if let Err(err) = pocket_cli::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
