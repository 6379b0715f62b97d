//! Integration tests for the quiz engine and its transports
//!
//! These tests drive a real `GameSession` task over its message channel and,
//! for the interactive transport, a real TCP connection.

use quiz_server::admin::AdminCommand;
use quiz_server::catalog::QuestionCatalog;
use quiz_server::player::TransportKind;
use quiz_server::session::{GameSession, SessionConfig, SessionMessage, SubmitOutcome};
use quiz_server::telnet;
use serde_json::Value;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const DECK: &str = "\
A?|a1|a2|a3|a4|1|-
B?|b1|b2|b3|b4|2|-
Race!|r1|r2|r3|r4|3|fastest
";

fn spawn_session(config: SessionConfig) -> mpsc::UnboundedSender<SessionMessage> {
    let catalog = QuestionCatalog::parse(Cursor::new(DECK)).unwrap();
    let session = GameSession::new(catalog, config);
    let handle = session.handle();
    tokio::spawn(session.run());
    handle
}

fn slow_config() -> SessionConfig {
    SessionConfig {
        round_duration: Duration::from_secs(60),
        display_delay: Duration::ZERO,
    }
}

async fn recv_payload(rx: oneshot::Receiver<Value>) -> Value {
    timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for long-poll payload")
        .expect("session dropped the responder")
}

fn enqueue_waiter(handle: &mpsc::UnboundedSender<SessionMessage>) -> oneshot::Receiver<Value> {
    let (responder, rx) = oneshot::channel();
    handle
        .send(SessionMessage::StatusWait { responder })
        .unwrap();
    rx
}

async fn submit(
    handle: &mpsc::UnboundedSender<SessionMessage>,
    id: &str,
    choice: u8,
) -> SubmitOutcome {
    let (reply, rx) = oneshot::channel();
    handle
        .send(SessionMessage::SubmitAnswer {
            id: id.to_string(),
            name: Some(id.to_string()),
            kind: TransportKind::Polled,
            choice,
            reply,
        })
        .unwrap();
    timeout(Duration::from_secs(5), rx).await.unwrap().unwrap()
}

/// LONG-POLL FAN-OUT TESTS
mod fanout_tests {
    use super::*;

    /// N queued /status waiters must all resolve with the same round-opened
    /// payload, and the queue must be empty afterwards.
    #[tokio::test]
    async fn queued_waiters_all_resolve_on_round_start() {
        let handle = spawn_session(slow_config());

        let waiters: Vec<_> = (0..5).map(|_| enqueue_waiter(&handle)).collect();
        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();

        let mut payloads = Vec::new();
        for rx in waiters {
            payloads.push(recv_payload(rx).await);
        }
        for payload in &payloads {
            assert_eq!(payload["round"], 0);
            assert_eq!(payload["started"], true);
            assert_eq!(payload["question"]["question"], "A?");
            // Answer key withheld.
            assert!(payload.get("correct").is_none());
            assert_eq!(payloads[0], *payload);
        }

        // A waiter queued after the event waits for the next one.
        let late = enqueue_waiter(&handle);
        handle
            .send(SessionMessage::Admin(AdminCommand::WebBoard))
            .unwrap();
        let payload = recv_payload(late).await;
        assert!(payload.get("scores").is_some());
        assert!(payload.get("round").is_none());
    }

    /// The full round cycle delivers payloads in order: question-opened,
    /// question-closed, leaderboard.
    #[tokio::test]
    async fn round_cycle_payload_order() {
        let handle = spawn_session(SessionConfig {
            round_duration: Duration::from_millis(200),
            display_delay: Duration::from_millis(50),
        });

        let opened = enqueue_waiter(&handle);
        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        let payload = recv_payload(opened).await;
        assert_eq!(payload["round"], 0);
        assert_eq!(payload["timeleft"], 0);

        assert!(matches!(
            submit(&handle, "alice", 1).await,
            SubmitOutcome::Accepted { choice: 1, previous: None }
        ));

        // The timer closes the round and resolves the next waiter with the
        // per-question results.
        let closed = enqueue_waiter(&handle);
        let payload = recv_payload(closed).await;
        assert_eq!(payload["correct"], 1);
        let rows = payload["lastanswers"].as_array().unwrap();
        let alice = rows
            .iter()
            .find(|r| r["name"] == "alice")
            .expect("alice missing from results");
        assert_eq!(alice["is_correct"], true);
        assert_eq!(alice["answer"], 1);

        // After the display delay, waiters get the leaderboard.
        let board = enqueue_waiter(&handle);
        let payload = recv_payload(board).await;
        let scores = payload["scores"].as_array().unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0]["name"], "alice");
        assert_eq!(scores[0]["correct"], 1);
        assert_eq!(scores[0]["rank"], 1);
    }

    /// An unanswered player shows up as "nada" in the closed payload, which
    /// also proves the new round cleared the previous round's answer.
    #[tokio::test]
    async fn answers_reset_between_rounds() {
        let handle = spawn_session(SessionConfig {
            round_duration: Duration::from_millis(150),
            display_delay: Duration::ZERO,
        });

        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        assert!(matches!(
            submit(&handle, "bob", 2).await,
            SubmitOutcome::Accepted { .. }
        ));

        // Skip ahead before the timer fires; bob does not answer question B.
        handle
            .send(SessionMessage::Admin(AdminCommand::Next))
            .unwrap();
        let closed = enqueue_waiter(&handle);
        let payload = recv_payload(closed).await;
        assert_eq!(payload["correct"], 2);
        let rows = payload["lastanswers"].as_array().unwrap();
        let bob = rows.iter().find(|r| r["name"] == "bob").unwrap();
        assert_eq!(bob["answer"], "nada");
        assert_eq!(bob["is_correct"], false);
    }
}

/// STATE MACHINE TESTS
mod state_tests {
    use super::*;

    /// Answer writes are rejected while no question is open.
    #[tokio::test]
    async fn submit_rejected_before_start_and_after_close() {
        let handle = spawn_session(SessionConfig {
            round_duration: Duration::from_millis(100),
            display_delay: Duration::ZERO,
        });

        assert_eq!(
            submit(&handle, "carol", 1).await,
            SubmitOutcome::RoundNotOpen { started: false }
        );

        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        assert!(matches!(
            submit(&handle, "carol", 1).await,
            SubmitOutcome::Accepted { .. }
        ));

        // Wait out the round, then try again.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            submit(&handle, "carol", 2).await,
            SubmitOutcome::RoundNotOpen { started: true }
        );
    }

    /// Changing an answer reports the previous choice.
    #[tokio::test]
    async fn changed_answer_reports_previous() {
        let handle = spawn_session(slow_config());
        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();

        assert!(matches!(
            submit(&handle, "dave", 1).await,
            SubmitOutcome::Accepted { choice: 1, previous: None }
        ));
        assert_eq!(
            submit(&handle, "dave", 4).await,
            SubmitOutcome::Accepted {
                choice: 4,
                previous: Some(1)
            }
        );
    }

    /// A kicked player disappears from the leaderboard.
    #[tokio::test]
    async fn kick_removes_player_from_scores() {
        let handle = spawn_session(slow_config());
        handle
            .send(SessionMessage::RegisterName {
                id: "session-1".to_string(),
                name: "eve".to_string(),
                kind: TransportKind::Polled,
            })
            .unwrap();

        let waiter = enqueue_waiter(&handle);
        handle
            .send(SessionMessage::Admin(AdminCommand::Kick("eve".to_string())))
            .unwrap();
        handle
            .send(SessionMessage::Admin(AdminCommand::WebBoard))
            .unwrap();

        let payload = recv_payload(waiter).await;
        assert_eq!(payload["scores"].as_array().unwrap().len(), 0);
    }
}

/// INTERACTIVE TRANSPORT TESTS
mod telnet_tests {
    use super::*;

    struct TelnetClient {
        lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl TelnetClient {
        async fn connect(addr: std::net::SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, writer) = stream.into_split();
            Self {
                lines: BufReader::new(read_half).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
        }

        /// Reads lines until one contains `needle`.
        async fn expect(&mut self, needle: &str) -> String {
            timeout(Duration::from_secs(5), async {
                loop {
                    match self.lines.next_line().await.unwrap() {
                        Some(line) if line.contains(needle) => return line,
                        Some(_) => continue,
                        None => panic!("connection closed while waiting for '{}'", needle),
                    }
                }
            })
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for '{}'", needle))
        }
    }

    async fn spawn_telnet(
        handle: mpsc::UnboundedSender<SessionMessage>,
    ) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(telnet::serve(listener, handle));
        addr
    }

    /// Full interactive flow: name registration, early answer rejection,
    /// question broadcast, answer selection and change, invalid input.
    #[tokio::test]
    async fn line_protocol_round_trip() {
        let handle = spawn_session(slow_config());
        let addr = spawn_telnet(handle.clone()).await;
        let mut client = TelnetClient::connect(addr).await;

        client.expect("Enter your player name").await;

        // Non-letters are stripped; an empty result re-prompts.
        client.send("123!!").await;
        client.expect("Invalid name. Try again.").await;
        client.send("Fr4nk!").await;
        client.expect("Name set to: Frnk").await;

        client.send("2").await;
        client.expect("Chill out mate").await;

        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        client.expect("Question 1:").await;
        client.expect("A?").await;
        client.expect("4) a4").await;

        client.send("2").await;
        client.expect("Selected answer: 2").await;
        client.send("3").await;
        client.expect("Changed answer from 2 to 3").await;
        client.send("9").await;
        client.expect("Invalid answer. Choose 1-4.").await;
        client.send("what?").await;
        client.expect("Invalid answer. Choose 1-4.").await;
    }

    /// change_name re-prompts and the new name lands on the leaderboard.
    #[tokio::test]
    async fn change_name_flow() {
        let handle = spawn_session(slow_config());
        let addr = spawn_telnet(handle.clone()).await;
        let mut client = TelnetClient::connect(addr).await;

        client.expect("Enter your player name").await;
        client.send("Alice").await;
        client.expect("Name set to: Alice").await;

        client.send("change_name").await;
        client.expect("Enter a new name:").await;
        client.send("Alicia").await;
        client.expect("Name set to: Alicia").await;

        let waiter = enqueue_waiter(&handle);
        handle
            .send(SessionMessage::Admin(AdminCommand::WebBoard))
            .unwrap();
        let payload = recv_payload(waiter).await;
        let scores = payload["scores"].as_array().unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0]["name"], "Alicia");
    }

    /// A dropped player who reconnects (necessarily from a new ephemeral
    /// port) resumes their name and score instead of starting a duplicate
    /// registry entry.
    #[tokio::test]
    async fn reconnect_resumes_name_and_score() {
        let handle = spawn_session(SessionConfig {
            round_duration: Duration::from_millis(150),
            display_delay: Duration::ZERO,
        });
        let addr = spawn_telnet(handle.clone()).await;

        let mut client = TelnetClient::connect(addr).await;
        client.expect("Enter your player name").await;
        client.send("Heidi").await;
        client.expect("Name set to: Heidi").await;

        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        client.expect("Question 1:").await;
        client.send("1").await;
        client.expect("Selected answer: 1").await;
        client.expect("Correct!").await;

        // Drop the connection and let the server notice before reconnecting.
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client = TelnetClient::connect(addr).await;
        client.expect("Name set to: Heidi. Please stand by").await;

        let waiter = enqueue_waiter(&handle);
        handle
            .send(SessionMessage::Admin(AdminCommand::WebBoard))
            .unwrap();
        let payload = recv_payload(waiter).await;
        let scores = payload["scores"].as_array().unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0]["name"], "Heidi");
        assert_eq!(scores[0]["correct"], 1);
    }

    /// A round close pushes the result text to the interactive player.
    #[tokio::test]
    async fn interactive_player_sees_results() {
        let handle = spawn_session(SessionConfig {
            round_duration: Duration::from_millis(200),
            display_delay: Duration::ZERO,
        });
        let addr = spawn_telnet(handle.clone()).await;
        let mut client = TelnetClient::connect(addr).await;

        client.expect("Enter your player name").await;
        client.send("Grace").await;
        client.expect("Name set to: Grace").await;

        handle
            .send(SessionMessage::Admin(AdminCommand::Start))
            .unwrap();
        client.expect("Question 1:").await;
        client.send("1").await;
        client.expect("Selected answer: 1").await;

        client.expect("Correct! The answer was 1: a1").await;
        client.expect("Leaderboard").await;
        client.expect("1. Grace: 1 correct, 0 wrong").await;
    }
}
