//! Admin control surface
//!
//! A closed table of commands parsed from stdin lines. Pattern-style
//! commands (`q <N>`, `time <N>`, `kick <name>`) are a small typed grammar:
//! verb plus one optional argument, no regex dispatch.

use crate::session::SessionMessage;
use log::error;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Everything the quiz host can do from the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Open question 0.
    Start,
    /// Open the next question.
    Next,
    /// Open a specific question by catalog index.
    Goto(usize),
    /// Close the open question early, scoring it as if the timer fired.
    Close,
    /// Round duration in seconds, effective from the next round.
    SetTime(u64),
    /// Broadcast and print the leaderboard.
    Board,
    /// Leaderboard for polled clients only.
    WebBoard,
    /// Disconnect and remove a player by display name or session id.
    Kick(String),
    DebugOn,
    DebugOff,
    /// Dump the player registry to the log.
    DebugState,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("eh? unrecognized command '{0}'")]
    Unrecognized(String),
    #[error("'{verb}' needs {expected}")]
    BadArgument {
        verb: &'static str,
        expected: &'static str,
    },
}

/// Parses one admin input line.
pub fn parse(input: &str) -> Result<AdminCommand, CommandError> {
    let input = input.trim();
    match input {
        "start" => return Ok(AdminCommand::Start),
        "next" | "n" => return Ok(AdminCommand::Next),
        "close" | "stop" => return Ok(AdminCommand::Close),
        "board" | "stats" => return Ok(AdminCommand::Board),
        "webboard" | "webstats" => return Ok(AdminCommand::WebBoard),
        "debug" | "debug on" => return Ok(AdminCommand::DebugOn),
        "debug off" => return Ok(AdminCommand::DebugOff),
        "debug state" => return Ok(AdminCommand::DebugState),
        _ => {}
    }

    if let Some(rest) = input.strip_prefix("kick") {
        let name = rest.trim();
        if name.is_empty() {
            return Err(CommandError::BadArgument {
                verb: "kick",
                expected: "a player name or session id",
            });
        }
        return Ok(AdminCommand::Kick(name.to_string()));
    }

    // `q5` and `time10` are accepted alongside the spaced forms.
    if let Some(rest) = input.strip_prefix("time") {
        return match rest.trim().parse::<u64>() {
            Ok(secs) => Ok(AdminCommand::SetTime(secs)),
            Err(_) => Err(CommandError::BadArgument {
                verb: "time",
                expected: "a duration in seconds",
            }),
        };
    }
    if let Some(rest) = input.strip_prefix('q') {
        return match rest.trim().parse::<usize>() {
            Ok(index) => Ok(AdminCommand::Goto(index)),
            Err(_) => Err(CommandError::Unrecognized(input.to_string())),
        };
    }

    Err(CommandError::Unrecognized(input.to_string()))
}

/// Reads admin commands from stdin until EOF, forwarding parsed commands to
/// the session. Validation errors are printed and mutate nothing.
pub async fn run_stdin(session: mpsc::UnboundedSender<SessionMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok(command) => {
                if session.send(SessionMessage::Admin(command)).is_err() {
                    break;
                }
            }
            Err(err) => error!("{}", err),
        }
    }
}
