use std::env;
use std::path::{Path, PathBuf};
use std::process;

use node_emulator::session::{Session, SessionError};

const DEFAULT_LOG_PATH: &str = "transcripts/emulator-session.log";

/// Boot, a dark period, a bright period, then direct register access.
const SCRIPT: &[&str] = &[
    "status",
    "light 5",
    "run",
    "light 812",
    "run 2",
    "read 0x00 1",
    "write 0x0B 0x11",
    "read 0x13 2",
    "send AT",
    "status",
    "exit",
];

fn main() {
    let path = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_LOG_PATH), PathBuf::from);

    if let Err(err) = record(&path) {
        eprintln!("{err}");
        process::exit(1);
    }
    println!("transcript written to {}", path.display());
}

fn record(path: &Path) -> Result<(), SessionError> {
    let mut session = Session::new(5, Some(path))?;
    session.boot()?;
    for line in SCRIPT {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
