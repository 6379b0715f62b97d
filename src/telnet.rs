//! Interactive line-oriented transport
//!
//! One task per connection handles both directions with a select loop:
//! inbound lines from the socket and outbound [`ClientCommand`]s from the
//! hub. Protocol: the first line is the player's display name (letters only,
//! everything else stripped), `change_name` re-prompts, a single digit 1-4
//! submits or changes an answer, anything else is an error message.
//!
//! Players are keyed by remote IP, not `ip:port`: a reconnect arrives on a
//! fresh ephemeral port, and keying by IP lets the returning player resume
//! their name and score.

use crate::hub::ClientCommand;
use crate::player::TransportKind;
use crate::session::{SessionMessage, SubmitOutcome};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Accepts interactive connections forever, spawning one task each.
pub async fn serve(listener: TcpListener, session: mpsc::UnboundedSender<SessionMessage>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let session = session.clone();
                tokio::spawn(async move {
                    handle_connection(stream, addr, session).await;
                });
            }
            Err(e) => error!("telnet accept failed: {}", e),
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: mpsc::UnboundedSender<SessionMessage>,
) {
    let id = addr.ip().to_string();
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    if session
        .send(SessionMessage::InteractiveConnected {
            id: id.clone(),
            sender: cmd_tx,
            reply: reply_tx,
        })
        .is_err()
    {
        return;
    }
    let existing_name = reply_rx.await.unwrap_or(None);

    let mut awaiting_name = existing_name.is_none();
    let banner = [
        "",
        "",
        "Welcome to the quiz night",
        "=========================",
        "",
    ];
    for line in banner {
        if write_line(&mut writer, line).await.is_err() {
            let _ = session.send(SessionMessage::InteractiveClosed { id });
            return;
        }
    }
    let greeting = match &existing_name {
        Some(name) => format!("Name set to: {}. Please stand by...", name),
        None => "Enter your player name (change later with \"change_name\"):".to_string(),
    };
    if write_line(&mut writer, &greeting).await.is_err() {
        let _ = session.send(SessionMessage::InteractiveClosed { id });
        return;
    }

    loop {
        tokio::select! {
            maybe_line = lines.next_line() => {
                match maybe_line {
                    Ok(Some(raw)) => {
                        let input = raw.trim().to_string();
                        if input.is_empty() {
                            continue;
                        }
                        debug!("{} - data: {}", id, input);
                        if !handle_input(&session, &id, &mut writer, &mut awaiting_name, &input).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("{} - read error: {}", id, e);
                        break;
                    }
                }
            }
            command = cmd_rx.recv() => {
                match command {
                    Some(ClientCommand::Line(line)) => {
                        if write_line(&mut writer, &line).await.is_err() {
                            break;
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        info!("{} - closing connection", id);
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
        }
    }

    let _ = session.send(SessionMessage::InteractiveClosed { id });
}

/// Reacts to one line of player input. Returns false when the connection
/// should be torn down (write failure or lost session).
async fn handle_input(
    session: &mpsc::UnboundedSender<SessionMessage>,
    id: &str,
    writer: &mut OwnedWriteHalf,
    awaiting_name: &mut bool,
    input: &str,
) -> bool {
    if *awaiting_name {
        let name: String = input.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        if name.is_empty() {
            return write_line(writer, "Invalid name. Try again.").await.is_ok();
        }
        if session
            .send(SessionMessage::RegisterName {
                id: id.to_string(),
                name: name.clone(),
                kind: TransportKind::Interactive,
            })
            .is_err()
        {
            return false;
        }
        *awaiting_name = false;
        let line = format!("Name set to: {}. Please stand by...", name);
        return write_line(writer, &line).await.is_ok();
    }

    if input == "change_name" {
        *awaiting_name = true;
        return write_line(writer, "Enter a new name:").await.is_ok();
    }

    let choice = match crate::catalog::parse_choice(input) {
        Some(c) => c,
        None => {
            return write_line(writer, "Invalid answer. Choose 1-4.").await.is_ok();
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if session
        .send(SessionMessage::SubmitAnswer {
            id: id.to_string(),
            name: None,
            kind: TransportKind::Interactive,
            choice,
            reply: reply_tx,
        })
        .is_err()
    {
        return false;
    }

    let line = match reply_rx.await {
        Ok(SubmitOutcome::Accepted { choice, previous }) => match previous {
            Some(p) if p != choice => format!("Changed answer from {} to {}", p, choice),
            _ => format!("Selected answer: {}", choice),
        },
        Ok(SubmitOutcome::RoundNotOpen { started: false }) => {
            "Chill out mate, we have not started yet".to_string()
        }
        Ok(SubmitOutcome::RoundNotOpen { started: true }) => "Too late :(".to_string(),
        Err(_) => return false,
    };
    write_line(writer, &line).await.is_ok()
}
