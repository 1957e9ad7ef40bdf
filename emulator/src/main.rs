use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use node_emulator::session::{DEFAULT_LIGHT, Session};

struct Options {
    light: u16,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: node-emulator [--light <value>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    let booted = Session::new(options.light, options.transcript.as_deref())
        .and_then(|mut session| session.boot().map(|lines| (session, lines)));
    let (mut session, boot_lines) = booted.unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });
    for boot_line in boot_lines {
        writeln!(writer, "{boot_line}")?;
    }
    let mut line = String::new();

    writeln!(
        writer,
        "Sensor node emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }

        if should_terminate(trimmed) {
            break;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        light: DEFAULT_LIGHT,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline.or_else(|| args.next()) {
            Some(value) => value,
            None => return Err(format!("Expected value after {flag}")),
        };
        match flag.as_str() {
            "--light" => {
                options.light = value
                    .parse()
                    .map_err(|_| format!("Invalid light level `{value}`"))?;
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value)),
            other => return Err(format!("Unknown option `{other}`")),
        }
    }
    Ok(options)
}
