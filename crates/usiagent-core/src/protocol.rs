//! Protocol collaborator interfaces and the default USI line codec.
//!
//! The codec only tokenizes command lines. Board text after `position sfen`
//! is carried through opaquely for the rule engine to interpret.

use std::io::{self, BufRead, Write};
use std::iter::Peekable;
use std::str::SplitWhitespace;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::{ConvertError, EmitError, OutputCreateError};
use crate::event::{AgentInput, GameResult, GoLimit, OptionValue, SystemEvent};
use crate::moves::{AppliedMove, BestMove, Move, ReserveKind};
use crate::player::{OptionKind, OptionSpec};
use crate::rules::{BasePosition, PositionSetup};

/// Responses an agent sends back to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutput {
    Id { name: String, author: String },
    Option(OptionSpec),
    UsiOk,
    ReadyOk,
    BestMove(BestMove),
    Info(String),
}

/// Text encoding of the agent protocol.
pub trait ProtocolCodec: Send {
    fn parse_input(&self, line: &str) -> Result<AgentInput, ConvertError>;

    fn parse_move(&self, text: &str) -> Result<Move, ConvertError>;

    fn format_move(&self, mv: &Move) -> Result<String, ConvertError>;

    /// Renders one output as zero or more protocol lines.
    fn format_output(&self, output: &AgentOutput) -> Result<Vec<String>, OutputCreateError>;
}

/// USI command codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsiCodec;

type Tokens<'a> = Peekable<SplitWhitespace<'a>>;

impl UsiCodec {
    fn parse_setoption(&self, tokens: &mut Tokens<'_>) -> Result<SystemEvent, ConvertError> {
        match tokens.next() {
            Some("name") => {}
            Some(other) => {
                return Err(ConvertError::InvalidValue {
                    what: "setoption keyword",
                    token: other.to_string(),
                })
            }
            None => {
                return Err(ConvertError::MissingArgument {
                    command: "setoption",
                    argument: "name",
                })
            }
        }
        let name = tokens.next().ok_or(ConvertError::MissingArgument {
            command: "setoption",
            argument: "an option name",
        })?;
        let value = match tokens.next() {
            None => OptionValue::Exist,
            Some("value") => {
                let rest: Vec<&str> = tokens.collect();
                if rest.is_empty() {
                    return Err(ConvertError::MissingArgument {
                        command: "setoption",
                        argument: "a value",
                    });
                }
                option_value(&rest.join(" "))
            }
            Some(other) => {
                return Err(ConvertError::InvalidValue {
                    what: "setoption keyword",
                    token: other.to_string(),
                })
            }
        };
        Ok(SystemEvent::SetOption(name.to_string(), value))
    }

    fn parse_position(&self, tokens: &mut Tokens<'_>) -> Result<PositionSetup, ConvertError> {
        let base = match tokens.next() {
            Some("startpos") => BasePosition::Startpos,
            Some("sfen") => {
                let mut fields = Vec::new();
                while let Some(field) = tokens.next_if(|t| *t != "moves") {
                    fields.push(field);
                }
                if fields.is_empty() {
                    return Err(ConvertError::MissingArgument {
                        command: "position",
                        argument: "sfen text",
                    });
                }
                BasePosition::Sfen(fields.join(" "))
            }
            Some(other) => {
                return Err(ConvertError::InvalidValue {
                    what: "position base",
                    token: other.to_string(),
                })
            }
            None => {
                return Err(ConvertError::MissingArgument {
                    command: "position",
                    argument: "a base position",
                })
            }
        };

        let mut setup = PositionSetup::new(base);
        match tokens.next() {
            None => {}
            Some("moves") => {
                for text in tokens {
                    setup.moves.push(self.parse_move(text)?);
                }
            }
            Some(other) => {
                return Err(ConvertError::InvalidValue {
                    what: "position keyword",
                    token: other.to_string(),
                })
            }
        }
        Ok(setup)
    }

    fn parse_go(&self, tokens: &mut Tokens<'_>) -> Result<GoLimit, ConvertError> {
        let mut times = [0u64; 5];
        let mut timed = false;
        let mut ponder = false;
        let mut infinite = false;

        while let Some(token) = tokens.next() {
            let slot = match token {
                "infinite" => {
                    infinite = true;
                    continue;
                }
                "ponder" => {
                    ponder = true;
                    continue;
                }
                "btime" => 0,
                "wtime" => 1,
                "byoyomi" => 2,
                "binc" => 3,
                "winc" => 4,
                other => {
                    return Err(ConvertError::InvalidValue {
                        what: "go parameter",
                        token: other.to_string(),
                    })
                }
            };
            let value = tokens.next().ok_or(ConvertError::MissingArgument {
                command: "go",
                argument: "a time value",
            })?;
            times[slot] = parse_millis(value)?;
            timed = true;
        }

        Ok(if ponder {
            GoLimit::Ponder
        } else if infinite || !timed {
            GoLimit::Infinite
        } else {
            GoLimit::Timed {
                black_ms: times[0],
                white_ms: times[1],
                byoyomi_ms: times[2],
                black_inc_ms: times[3],
                white_inc_ms: times[4],
            }
        })
    }

    fn format_option(&self, spec: &OptionSpec) -> Result<String, OutputCreateError> {
        check_token("option name", &spec.name)?;
        let head = format!("option name {} type", spec.name);
        let line = match &spec.kind {
            OptionKind::Check { default } => format!("{head} check default {default}"),
            OptionKind::Spin { default, min, max } => {
                format!("{head} spin default {default} min {min} max {max}")
            }
            OptionKind::Combo { default, vars } => {
                check_token("combo default", default)?;
                let mut line = format!("{head} combo default {default}");
                for var in vars {
                    check_token("combo var", var)?;
                    line.push_str(" var ");
                    line.push_str(var);
                }
                line
            }
            OptionKind::Text { default } => {
                check_line("string default", default)?;
                format!("{head} string default {}", or_empty(default))
            }
            OptionKind::Filename { default } => {
                check_line("filename default", default)?;
                format!("{head} filename default {}", or_empty(default))
            }
            OptionKind::Button => format!("{head} button"),
        };
        Ok(line)
    }
}

impl ProtocolCodec for UsiCodec {
    fn parse_input(&self, line: &str) -> Result<AgentInput, ConvertError> {
        let mut tokens = line.split_whitespace().peekable();
        let unknown = || ConvertError::UnknownCommand {
            line: line.trim().to_string(),
        };
        let event = match tokens.next().ok_or_else(unknown)? {
            "usi" => SystemEvent::Usi,
            "isready" => SystemEvent::IsReady,
            "setoption" => self.parse_setoption(&mut tokens)?,
            "usinewgame" => SystemEvent::UsiNewGame,
            "position" => SystemEvent::Position(self.parse_position(&mut tokens)?),
            "go" => SystemEvent::Go(self.parse_go(&mut tokens)?),
            "stop" => SystemEvent::Stop,
            "ponderhit" => SystemEvent::PonderHit,
            "quit" => SystemEvent::Quit,
            "gameover" => SystemEvent::GameOver(match tokens.next() {
                Some("win") => GameResult::Win,
                Some("lose") => GameResult::Lose,
                Some("draw") => GameResult::Draw,
                Some(other) => {
                    return Err(ConvertError::InvalidValue {
                        what: "game result",
                        token: other.to_string(),
                    })
                }
                None => {
                    return Err(ConvertError::MissingArgument {
                        command: "gameover",
                        argument: "a result",
                    })
                }
            }),
            _ => return Err(unknown()),
        };
        Ok(AgentInput::System(event))
    }

    fn parse_move(&self, text: &str) -> Result<Move, ConvertError> {
        let invalid = || ConvertError::InvalidMove {
            text: text.to_string(),
        };
        match text.as_bytes() {
            [piece, b'*', file, rank] => {
                let kind = ReserveKind::from_letter(char::from(*piece)).ok_or_else(invalid)?;
                Ok(Move::Put {
                    kind,
                    to: square(*file, *rank).ok_or_else(invalid)?,
                })
            }
            [f1, r1, f2, r2, rest @ ..] => {
                let promote = match rest {
                    [] => false,
                    [b'+'] => true,
                    _ => return Err(invalid()),
                };
                Ok(Move::To {
                    from: square(*f1, *r1).ok_or_else(invalid)?,
                    to: square(*f2, *r2).ok_or_else(invalid)?,
                    promote,
                })
            }
            _ => Err(invalid()),
        }
    }

    fn format_move(&self, mv: &Move) -> Result<String, ConvertError> {
        AppliedMove::try_from(*mv)?;
        Ok(mv.to_string())
    }

    fn format_output(&self, output: &AgentOutput) -> Result<Vec<String>, OutputCreateError> {
        let lines = match output {
            AgentOutput::Id { name, author } => {
                check_line("id name", name)?;
                check_line("id author", author)?;
                vec![format!("id name {name}"), format!("id author {author}")]
            }
            AgentOutput::Option(spec) => vec![self.format_option(spec)?],
            AgentOutput::UsiOk => vec!["usiok".to_string()],
            AgentOutput::ReadyOk => vec!["readyok".to_string()],
            AgentOutput::BestMove(BestMove::Move(mv)) => {
                vec![format!("bestmove {}", self.format_move(mv)?)]
            }
            AgentOutput::BestMove(BestMove::Resign) => vec!["bestmove resign".to_string()],
            AgentOutput::BestMove(BestMove::Win) => vec!["bestmove win".to_string()],
            // Abort is internal to the agent; the peer sees nothing.
            AgentOutput::BestMove(BestMove::Abort) => Vec::new(),
            AgentOutput::Info(text) => {
                check_line("info string", text)?;
                vec![format!("info string {text}")]
            }
        };
        Ok(lines)
    }
}

fn option_value(text: &str) -> OptionValue {
    match text {
        "true" => OptionValue::Bool(true),
        "false" => OptionValue::Bool(false),
        _ => text
            .parse::<i64>()
            .map(OptionValue::Num)
            .unwrap_or_else(|_| OptionValue::Str(text.to_string())),
    }
}

fn parse_millis(token: &str) -> Result<u64, ConvertError> {
    token
        .parse::<u64>()
        .map_err(|source| ConvertError::InvalidNumber {
            token: token.to_string(),
            source,
        })
}

fn square(file: u8, rank: u8) -> Option<(u8, u8)> {
    let file = matches!(file, b'1'..=b'9').then(|| file - b'0')?;
    let rank = matches!(rank, b'a'..=b'i').then(|| rank - b'a' + 1)?;
    Some((file, rank))
}

pub(crate) fn check_line(field: &'static str, text: &str) -> Result<(), OutputCreateError> {
    if text.contains(['\n', '\r']) {
        return Err(OutputCreateError::InvalidText {
            field,
            text: text.to_string(),
        });
    }
    Ok(())
}

fn check_token(field: &'static str, text: &str) -> Result<(), OutputCreateError> {
    if text.is_empty() || text.contains(char::is_whitespace) {
        return Err(OutputCreateError::InvalidText {
            field,
            text: text.to_string(),
        });
    }
    Ok(())
}

fn or_empty(text: &str) -> &str {
    if text.is_empty() {
        "<empty>"
    } else {
        text
    }
}

/// Result of waiting on an [`InputSource`].
#[derive(Debug)]
pub enum Polled {
    Input(AgentInput),
    /// A line arrived but could not be parsed.
    Malformed(ConvertError),
    /// Nothing arrived within the timeout.
    Idle,
    /// The source is exhausted.
    Closed,
}

/// Where an agent runtime reads its inputs from.
pub trait InputSource {
    fn poll(&mut self, timeout: Duration) -> io::Result<Polled>;
}

impl InputSource for Receiver<AgentInput> {
    fn poll(&mut self, timeout: Duration) -> io::Result<Polled> {
        match self.recv_timeout(timeout) {
            Ok(input) => Ok(Polled::Input(input)),
            Err(RecvTimeoutError::Timeout) => Ok(Polled::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Polled::Closed),
        }
    }
}

/// Line-oriented reader over any `BufRead`.
///
/// Reads block until a full line is available, so the poll timeout is not
/// honoured. Blank lines are skipped.
pub struct ProtocolReader<R, C = UsiCodec> {
    reader: R,
    codec: C,
    line: String,
}

impl<R: BufRead> ProtocolReader<R, UsiCodec> {
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, UsiCodec)
    }
}

impl<R: BufRead, C: ProtocolCodec> ProtocolReader<R, C> {
    pub fn with_codec(reader: R, codec: C) -> Self {
        Self {
            reader,
            codec,
            line: String::new(),
        }
    }
}

impl<R: BufRead, C: ProtocolCodec> InputSource for ProtocolReader<R, C> {
    fn poll(&mut self, _timeout: Duration) -> io::Result<Polled> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(Polled::Closed);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            trace!(line = %line, "protocol input");
            return Ok(match self.codec.parse_input(line) {
                Ok(input) => Polled::Input(input),
                Err(e) => Polled::Malformed(e),
            });
        }
    }
}

/// Where an agent runtime sends its outputs.
pub trait OutputSink: Send {
    fn emit(&mut self, output: AgentOutput) -> Result<(), EmitError>;
}

impl OutputSink for Sender<AgentOutput> {
    fn emit(&mut self, output: AgentOutput) -> Result<(), EmitError> {
        self.send(output).map_err(|_| EmitError::Closed)
    }
}

/// Writes formatted protocol lines, flushing after every output.
pub struct ProtocolWriter<W, C = UsiCodec> {
    writer: W,
    codec: C,
}

impl<W: Write + Send> ProtocolWriter<W, UsiCodec> {
    pub fn new(writer: W) -> Self {
        Self::with_codec(writer, UsiCodec)
    }
}

impl<W: Write + Send, C: ProtocolCodec> ProtocolWriter<W, C> {
    pub fn with_codec(writer: W, codec: C) -> Self {
        Self { writer, codec }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send, C: ProtocolCodec> OutputSink for ProtocolWriter<W, C> {
    fn emit(&mut self, output: AgentOutput) -> Result<(), EmitError> {
        for line in self.codec.format_output(&output)? {
            debug!(line = %line, "protocol output");
            writeln!(self.writer, "{line}")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
