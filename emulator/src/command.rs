//! Command grammar for the emulator prompt.
//!
//! Numbers accept decimal or `0x`-prefixed hexadecimal. Keywords are matched
//! case-insensitively; `send` takes the rest of the line verbatim.

use core::fmt;

use winnow::ascii::{Caseless, HexUint, Uint, dec_uint, hex_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::rest;

/// Parsed prompt command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the application for this many timer periods.
    Run { periods: u32 },
    /// Blocking register read from the light sensor.
    Read { register: u8, count: u8 },
    /// Blocking register write to the light sensor.
    Write { register: u8, value: u32, count: u8 },
    /// Transmit raw text on the serial link.
    Send { text: String },
    /// Light level latched on the next forced conversion.
    Light { value: u16 },
    Status,
    Help,
    Exit,
}

/// Input the grammar could not accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: String,
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot parse `{}` at column {}", self.line, self.offset + 1)
    }
}

impl std::error::Error for ParseError {}

/// Parses one prompt line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    command
        .parse(trimmed)
        .map(Some)
        .map_err(|error| ParseError {
            line: trimmed.to_owned(),
            offset: error.offset(),
        })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    terminated(
        alt((run, read, write, send, light, status, help, exit)),
        (space0, eof),
    )
    .parse_next(input)
}

fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    Caseless(word)
}

fn number<O: Uint + HexUint>(input: &mut &str) -> ModalResult<O> {
    alt((preceded(alt(("0x", "0X")), hex_uint), dec_uint)).parse_next(input)
}

fn argument<'i, O>(
    mut parser: impl Parser<&'i str, O, ErrMode<ContextError>>,
) -> impl Parser<&'i str, O, ErrMode<ContextError>> {
    move |input: &mut &'i str| {
        space1.parse_next(input)?;
        parser.parse_next(input)
    }
}

fn run(input: &mut &str) -> ModalResult<Command> {
    (keyword("run"), opt(argument(number::<u32>)))
        .map(|(_, periods)| Command::Run {
            periods: periods.unwrap_or(1),
        })
        .parse_next(input)
}

fn read(input: &mut &str) -> ModalResult<Command> {
    (keyword("read"), argument(number::<u8>), argument(number::<u8>))
        .map(|(_, register, count)| Command::Read { register, count })
        .parse_next(input)
}

fn write(input: &mut &str) -> ModalResult<Command> {
    (
        keyword("write"),
        argument(number::<u8>),
        argument(number::<u32>),
        opt(argument(number::<u8>)),
    )
        .map(|(_, register, value, count)| Command::Write {
            register,
            value,
            count: count.unwrap_or(1),
        })
        .parse_next(input)
}

fn send(input: &mut &str) -> ModalResult<Command> {
    (keyword("send"), space1, rest)
        .map(|(_, _, text): (_, _, &str)| Command::Send {
            text: text.to_owned(),
        })
        .parse_next(input)
}

fn light(input: &mut &str) -> ModalResult<Command> {
    (keyword("light"), argument(number::<u16>))
        .map(|(_, value)| Command::Light { value })
        .parse_next(input)
}

fn status(input: &mut &str) -> ModalResult<Command> {
    keyword("status").value(Command::Status).parse_next(input)
}

fn help(input: &mut &str) -> ModalResult<Command> {
    alt((keyword("help"), "?")).value(Command::Help).parse_next(input)
}

fn exit(input: &mut &str) -> ModalResult<Command> {
    alt((keyword("exit"), keyword("quit")))
        .value(Command::Exit)
        .parse_next(input)
}
