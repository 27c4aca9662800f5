//! Parser for the two-letter terminal commands.
//!
//! Every command is a case-insensitive two-letter keyword, optionally followed
//! by comma-separated decimal arguments (`sv 25,25`, `st 1000,50,50,50,1000`).
//! A new serial number may carry a trailing `C`, which host tooling appends as
//! a confirmation mark (`sn 1042C`).
//! The keyword is matched against [`COMMANDS`]; the arguments are parsed with
//! `winnow` combinators over the rest of the line.

use core::fmt;

use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::settings::TIMING_SLOTS;

/// Keywords accepted by the terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Run,
    Off,
    SetVoltages,
    SetTimes,
    ShowSettings,
    Status,
    Write,
    Version,
    Serial,
    EchoOff,
    RecorderOn,
    RecorderOff,
    Help,
}

/// Static description of one terminal command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

/// Every command the terminal understands, in help order.
pub const COMMANDS: [CommandSpec; 13] = [
    CommandSpec {
        name: "ru",
        tag: CommandTag::Run,
        usage: "ru",
        summary: "start the pulse train",
    },
    CommandSpec {
        name: "of",
        tag: CommandTag::Off,
        usage: "of",
        summary: "stop the pulse train",
    },
    CommandSpec {
        name: "sv",
        tag: CommandTag::SetVoltages,
        usage: "sv <v1>,<v2>",
        summary: "set positive and negative amplitude (0-50)",
    },
    CommandSpec {
        name: "st",
        tag: CommandTag::SetTimes,
        usage: "st <t0>,<t1>,<t2>,<t3>,<t4>",
        summary: "set pre-wait, widths, gap and period",
    },
    CommandSpec {
        name: "ss",
        tag: CommandTag::ShowSettings,
        usage: "ss",
        summary: "show voltages and timings",
    },
    CommandSpec {
        name: "gs",
        tag: CommandTag::Status,
        usage: "gs",
        summary: "report run status",
    },
    CommandSpec {
        name: "wr",
        tag: CommandTag::Write,
        usage: "wr",
        summary: "store settings in non-volatile memory",
    },
    CommandSpec {
        name: "ve",
        tag: CommandTag::Version,
        usage: "ve",
        summary: "show firmware version",
    },
    CommandSpec {
        name: "sn",
        tag: CommandTag::Serial,
        usage: "sn [<number>]",
        summary: "show or store the serial number",
    },
    CommandSpec {
        name: "eo",
        tag: CommandTag::EchoOff,
        usage: "eo",
        summary: "stop echoing typed characters",
    },
    CommandSpec {
        name: "re",
        tag: CommandTag::RecorderOn,
        usage: "re",
        summary: "send a sample record after each pulse",
    },
    CommandSpec {
        name: "nr",
        tag: CommandTag::RecorderOff,
        usage: "nr",
        summary: "stop sending sample records",
    },
    CommandSpec {
        name: "he",
        tag: CommandTag::Help,
        usage: "he [command]",
        summary: "list commands",
    },
];

/// Looks up a command by keyword, ignoring case.
#[must_use]
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
}

/// Parsed terminal command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Run,
    Off,
    SetVoltages { positive: u8, negative: u8 },
    SetTimes([u16; TIMING_SLOTS]),
    ShowSettings,
    Status,
    Write,
    Version,
    /// `None` queries the stored number.
    Serial(Option<u16>),
    EchoOff,
    Recorder(bool),
    Help { topic: Option<&'a str> },
}

/// Reason a line was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Nothing but whitespace.
    Empty,
    /// The keyword is not in [`COMMANDS`].
    UnknownCommand,
    /// The keyword is known but its arguments are malformed or out of range.
    InvalidArguments { usage: &'static str },
}

/// Terminal line that could not be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseError<'a> {
    pub kind: ParseErrorKind,
    /// Byte offset into the trimmed line where parsing stopped.
    pub offset: usize,
    pub line: &'a str,
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParseErrorKind::Empty => f.write_str("empty command"),
            ParseErrorKind::UnknownCommand => write!(f, "unknown command `{}`", self.line),
            ParseErrorKind::InvalidArguments { usage } => {
                write!(f, "invalid arguments at column {}, usage: {usage}", self.offset)
            }
        }
    }
}

/// Parses one terminal line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError {
            kind: ParseErrorKind::Empty,
            offset: 0,
            line,
        });
    }

    let mut rest = line;
    let entry = keyword
        .parse_next(&mut rest)
        .ok()
        .and_then(find_command)
        .ok_or(ParseError {
            kind: ParseErrorKind::UnknownCommand,
            offset: 0,
            line,
        })?;
    let arguments_at = line.len() - rest.len();

    let parsed = match entry.tag {
        CommandTag::Run => end.value(Command::Run).parse(rest),
        CommandTag::Off => end.value(Command::Off).parse(rest),
        CommandTag::ShowSettings => end.value(Command::ShowSettings).parse(rest),
        CommandTag::Status => end.value(Command::Status).parse(rest),
        CommandTag::Write => end.value(Command::Write).parse(rest),
        CommandTag::Version => end.value(Command::Version).parse(rest),
        CommandTag::EchoOff => end.value(Command::EchoOff).parse(rest),
        CommandTag::RecorderOn => end.value(Command::Recorder(true)).parse(rest),
        CommandTag::RecorderOff => end.value(Command::Recorder(false)).parse(rest),
        CommandTag::Serial => serial.map(Command::Serial).parse(rest),
        CommandTag::SetVoltages => voltages
            .map(|[positive, negative]| Command::SetVoltages { positive, negative })
            .parse(rest),
        CommandTag::SetTimes => times.map(Command::SetTimes).parse(rest),
        CommandTag::Help => help_topic
            .map(|topic| Command::Help { topic })
            .parse(rest),
    };

    parsed.map_err(|error| ParseError {
        kind: ParseErrorKind::InvalidArguments { usage: entry.usage },
        offset: arguments_at + error.offset(),
        line,
    })
}

fn keyword<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphabetic()).parse_next(input)
}

fn end(input: &mut &str) -> ModalResult<()> {
    (space0, eof).void().parse_next(input)
}

fn separator(input: &mut &str) -> ModalResult<()> {
    (space0, ',', space0).void().parse_next(input)
}

fn voltages(input: &mut &str) -> ModalResult<[u8; 2]> {
    let (_, positive, _, negative, ()) =
        (space1, dec_uint, separator, dec_uint, end).parse_next(input)?;
    Ok([positive, negative])
}

fn times(input: &mut &str) -> ModalResult<[u16; TIMING_SLOTS]> {
    space1.parse_next(input)?;
    let mut values = [0u16; TIMING_SLOTS];
    for (index, value) in values.iter_mut().enumerate() {
        if index > 0 {
            separator.parse_next(input)?;
        }
        *value = dec_uint.parse_next(input)?;
    }
    end.parse_next(input)?;
    Ok(values)
}

fn serial(input: &mut &str) -> ModalResult<Option<u16>> {
    let number = opt(preceded(space1, terminated(dec_uint, opt(one_of(['C', 'c'])))))
        .parse_next(input)?;
    end.parse_next(input)?;
    Ok(number)
}

fn help_topic<'a>(input: &mut &'a str) -> ModalResult<Option<&'a str>> {
    let topic = opt(preceded(space1, keyword)).parse_next(input)?;
    end.parse_next(input)?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("ru"), Command::Run);
        assert_eq!(parse_ok("of"), Command::Off);
        assert_eq!(parse_ok("ss"), Command::ShowSettings);
        assert_eq!(parse_ok("gs"), Command::Status);
        assert_eq!(parse_ok("wr"), Command::Write);
        assert_eq!(parse_ok("ve"), Command::Version);
        assert_eq!(parse_ok("he"), Command::Help { topic: None });
        assert_eq!(parse_ok("eo"), Command::EchoOff);
        assert_eq!(parse_ok("re"), Command::Recorder(true));
        assert_eq!(parse_ok("nr"), Command::Recorder(false));
    }

    #[test]
    fn parses_serial_query_and_assignment() {
        assert_eq!(parse_ok("sn"), Command::Serial(None));
        assert_eq!(parse_ok("sn 1042"), Command::Serial(Some(1042)));
        assert_eq!(parse_ok("sn 1042C"), Command::Serial(Some(1042)));
        assert!(parse("sn 1042X").is_err());
        assert!(parse("sn 70000").is_err());
    }

    #[test]
    fn parses_voltages_with_optional_spaces() {
        let expected = Command::SetVoltages {
            positive: 25,
            negative: 30,
        };
        assert_eq!(parse_ok("sv 25,30"), expected);
        assert_eq!(parse_ok("  SV 25 , 30\r\n"), expected);
    }

    #[test]
    fn parses_five_timings() {
        assert_eq!(
            parse_ok("st 1000,50,50,50,1000"),
            Command::SetTimes([1000, 50, 50, 50, 1000])
        );
        assert_eq!(
            parse_ok("st 0,65535,0,0,1"),
            Command::SetTimes([0, 65535, 0, 0, 1])
        );
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(parse_ok("he sv"), Command::Help { topic: Some("sv") });
    }

    #[test]
    fn supports_case_insensitive_keywords() {
        assert_eq!(parse_ok("Ru"), Command::Run);
        assert_eq!(parse_ok("wR"), Command::Write);
    }

    #[test]
    fn rejects_empty_and_unknown_lines() {
        assert_eq!(parse("   ").unwrap_err().kind, ParseErrorKind::Empty);
        assert_eq!(parse("xx").unwrap_err().kind, ParseErrorKind::UnknownCommand);
        assert_eq!(parse("run").unwrap_err().kind, ParseErrorKind::UnknownCommand);
        assert_eq!(parse("42").unwrap_err().kind, ParseErrorKind::UnknownCommand);
    }

    #[test]
    fn rejects_malformed_arguments() {
        for line in [
            "sv",
            "sv 25",
            "sv 25,",
            "sv 256,1",
            "sv 1,2,3",
            "st 1,2,3,4",
            "st 1,2,3,4,65536",
            "ru now",
        ] {
            match parse(line) {
                Err(ParseError {
                    kind: ParseErrorKind::InvalidArguments { .. },
                    ..
                }) => {}
                other => panic!("`{line}` parsed unexpectedly: {other:?}"),
            }
        }
    }

    #[test]
    fn argument_errors_point_past_the_keyword() {
        let error = parse("sv 25,x").unwrap_err();
        assert!(error.offset >= 2);
        assert_eq!(
            error.kind,
            ParseErrorKind::InvalidArguments {
                usage: "sv <v1>,<v2>"
            }
        );
    }

    #[test]
    fn catalog_names_are_unique_keywords() {
        for (index, entry) in COMMANDS.iter().enumerate() {
            assert_eq!(entry.name.len(), 2);
            assert!(entry.usage.starts_with(entry.name));
            assert!(COMMANDS[index + 1..].iter().all(|other| other.name != entry.name));
            assert_eq!(find_command(entry.name).map(|found| found.tag), Some(entry.tag));
        }
    }
}
