//! Round state machine and engine event loop
//!
//! All round-state mutation happens inside one task that owns the registry,
//! the hub and the catalog, consuming [`SessionMessage`]s from an unbounded
//! channel. Admin commands, timer fires and transport events are the only
//! triggers, and each reaction runs to completion before the next message is
//! taken, so the engine needs no locking.
//!
//! Round timers are spawned tasks that sleep and send a `TimerFired` message
//! tagged with the round's epoch. Starting a new round bumps the epoch, so a
//! superseded timer that fires anyway is recognized as stale and ignored.

use crate::admin::AdminCommand;
use crate::catalog::QuestionCatalog;
use crate::hub::{ClientCommand, InteractiveTransport, NotificationHub, PolledTransport};
use crate::player::{PlayerRegistry, TransportKind};
use crate::scoring::{self, Outcome, RankEntry};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Where the session is in the open/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    QuestionOpen,
    QuestionClosed,
}

/// Engine timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long a question stays open. Adjustable at runtime; takes effect
    /// on the next round.
    pub round_duration: Duration,
    /// Pause between the per-question results and the leaderboard payload,
    /// so clients can render a drumroll. Broadcast timing, not correctness.
    pub display_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(15),
            display_delay: Duration::from_millis(500),
        }
    }
}

/// Reply to an answer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { choice: u8, previous: Option<u8> },
    /// No question is open. `started` distinguishes "nothing has started
    /// yet" from "you are too late for this one".
    RoundNotOpen { started: bool },
}

/// Immediate state snapshot for the no-wait endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub round: i64,
    pub started: bool,
    pub scores: Vec<RankEntry>,
}

/// Everything that can happen to the engine.
#[derive(Debug)]
pub enum SessionMessage {
    Admin(AdminCommand),
    /// A round timer elapsed. Ignored unless the epoch is current.
    TimerFired { epoch: u64 },
    /// The post-close display delay elapsed; time to resolve polled waiters
    /// with the leaderboard. Ignored unless the epoch is current.
    LeaderboardDue { epoch: u64 },
    /// An interactive connection came up. Replies with the display name a
    /// returning player already had, if any.
    InteractiveConnected {
        id: String,
        sender: mpsc::UnboundedSender<ClientCommand>,
        reply: oneshot::Sender<Option<String>>,
    },
    InteractiveClosed { id: String },
    RegisterName {
        id: String,
        name: String,
        kind: TransportKind,
    },
    SubmitAnswer {
        id: String,
        /// Display name to seed a lazily created player with.
        name: Option<String>,
        kind: TransportKind,
        choice: u8,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    /// Queue a long-poll responder for the next broadcast event.
    StatusWait { responder: oneshot::Sender<Value> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
}

/// The orchestrator. Owns the state machine and every mutable structure;
/// transports only hold the message-channel handle.
pub struct GameSession {
    catalog: QuestionCatalog,
    registry: PlayerRegistry,
    hub: NotificationHub,
    state: RoundState,
    current_question: Option<usize>,
    epoch: u64,
    config: SessionConfig,
    timer: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<SessionMessage>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl GameSession {
    pub fn new(catalog: QuestionCatalog, config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            catalog,
            registry: PlayerRegistry::new(),
            hub: NotificationHub::new(),
            state: RoundState::Idle,
            current_question: None,
            epoch: 0,
            config,
            timer: None,
            tx,
            rx,
        }
    }

    /// Handle for transports, the admin loop and timers to send events with.
    pub fn handle(&self) -> mpsc::UnboundedSender<SessionMessage> {
        self.tx.clone()
    }

    /// Runs the engine until every handle is dropped.
    pub async fn run(mut self) {
        info!("quiz session ready ({} questions)", self.catalog.len());
        while let Some(message) = self.rx.recv().await {
            self.handle_message(message);
        }
        info!("quiz session shutting down");
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Admin(command) => self.handle_admin(command),
            SessionMessage::TimerFired { epoch } => {
                if epoch != self.epoch {
                    debug!("stale round timer (epoch {}) ignored", epoch);
                    return;
                }
                if self.state == RoundState::QuestionOpen {
                    self.close_round();
                }
            }
            SessionMessage::LeaderboardDue { epoch } => {
                if epoch != self.epoch {
                    debug!("stale leaderboard broadcast (epoch {}) ignored", epoch);
                    return;
                }
                let payload = json!({ "scores": scoring::rank(&self.registry) });
                self.hub.resolve_responders(&payload);
            }
            SessionMessage::InteractiveConnected { id, sender, reply } => {
                self.hub
                    .attach(Box::new(InteractiveTransport::new(id.clone(), sender)));
                let player = self.registry.ensure(&id, TransportKind::Interactive);
                player.connected = true;
                info!("{} - connected", id);
                let _ = reply.send(player.display_name.clone());
            }
            SessionMessage::InteractiveClosed { id } => {
                self.registry.mark_disconnected(&id);
                self.hub.detach(&id);
                warn!("{} - disconnected", id);
            }
            SessionMessage::RegisterName { id, name, kind } => match kind {
                TransportKind::Polled => {
                    self.registry.register(&id, &name, kind);
                    self.hub.attach(Box::new(PolledTransport::new(id)));
                }
                TransportKind::Interactive => {
                    self.registry.set_name(&id, &name, kind);
                    // Web monitors refresh when an interactive player joins.
                    self.broadcast_leaderboard(true);
                }
            },
            SessionMessage::SubmitAnswer {
                id,
                name,
                kind,
                choice,
                reply,
            } => {
                let outcome = self.submit_answer(&id, name.as_deref(), kind, choice);
                let _ = reply.send(outcome);
            }
            SessionMessage::StatusWait { responder } => {
                self.hub.enqueue_responder(responder);
            }
            SessionMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_admin(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::Start => self.start_round(0),
            AdminCommand::Next => {
                let next = self.current_question.map(|i| i + 1).unwrap_or(0);
                self.start_round(next);
            }
            AdminCommand::Goto(index) => self.start_round(index),
            AdminCommand::Close => {
                if self.state == RoundState::QuestionOpen {
                    self.close_round();
                } else {
                    warn!("close: no question is open");
                }
            }
            AdminCommand::SetTime(seconds) => {
                self.config.round_duration = Duration::from_secs(seconds);
                info!("round duration set to {}s (next round onward)", seconds);
            }
            AdminCommand::Board => self.broadcast_leaderboard(false),
            AdminCommand::WebBoard => self.broadcast_leaderboard(true),
            AdminCommand::Kick(name) => self.kick(&name),
            AdminCommand::DebugOn => {
                log::set_max_level(log::LevelFilter::Debug);
                debug!("debug enabled");
            }
            AdminCommand::DebugOff => {
                log::set_max_level(log::LevelFilter::Info);
                info!("debug disabled");
            }
            AdminCommand::DebugState => {
                info!("{} players, {} pending responders, state {:?}",
                    self.registry.len(),
                    self.hub.pending_responders(),
                    self.state
                );
                for player in self.registry.iter() {
                    info!(
                        "* {}: {} - {:?}{}",
                        player.id,
                        player.display_name.as_deref().unwrap_or("<unnamed>"),
                        player.transport,
                        if player.connected { "" } else { " (disconnected)" }
                    );
                }
            }
        }
    }

    /// Opens a question: resets per-round player state, pushes the question
    /// to both transports and arms the round timer under a fresh epoch.
    fn start_round(&mut self, index: usize) {
        let question = match self.catalog.get(index) {
            Some(q) => q.clone(),
            None => {
                error!("invalid question index {}", index);
                return;
            }
        };

        // Cancel before rescheduling; the epoch bump makes a fire that
        // slipped through anyway a no-op.
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.epoch += 1;
        self.registry.reset_round();
        self.current_question = Some(index);
        self.state = RoundState::QuestionOpen;

        info!("showing question {} / {}", index + 1, self.catalog.len());

        self.hub.broadcast_line("");
        self.hub.broadcast_line(&format!("Question {}:", index + 1));
        self.hub.broadcast_line(&question.text);
        for (slot, choice) in question.choices.iter().enumerate() {
            self.hub.broadcast_line(&format!("{}) {}", slot + 1, choice));
        }

        // Answer key withheld from the polled payload.
        let payload = json!({
            "round": index,
            "question": {
                "question": question.text,
                "answers": question.choices,
            },
            "timeleft": self.config.round_duration.as_secs(),
            "started": true,
        });
        self.hub.resolve_responders(&payload);

        let epoch = self.epoch;
        let duration = self.config.round_duration;
        let tx = self.tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(SessionMessage::TimerFired { epoch });
        }));
    }

    /// Closes the open question: scores every player, updates counters,
    /// pushes results, and schedules the delayed leaderboard broadcast.
    fn close_round(&mut self) {
        let index = match self.current_question {
            Some(i) => i,
            None => return,
        };
        let question = match self.catalog.get(index) {
            Some(q) => q.clone(),
            None => return,
        };

        self.state = RoundState::QuestionClosed;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let evaluation = scoring::evaluate(&question, &self.registry);
        let correct = evaluation.canonical_choice;
        let correct_text = question.choices[(correct - 1) as usize].clone();

        let mut last_answers = Vec::new();
        for (id, outcome) in &evaluation.outcomes {
            let (line, answer_value, is_correct) = match outcome {
                Outcome::Correct => (
                    format!("Correct! The answer was {}: {}", correct, correct_text),
                    self.registry
                        .get(id)
                        .and_then(|p| p.current_answer)
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    true,
                ),
                Outcome::Incorrect => (
                    format!("WRRROONG! The correct answer was {}: {}", correct, correct_text),
                    self.registry
                        .get(id)
                        .and_then(|p| p.current_answer)
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    false,
                ),
                Outcome::Unanswered => (
                    format!(
                        "Oh noes, you didn't answer! The correct answer was {}: {}",
                        correct, correct_text
                    ),
                    Value::from("nada"),
                    false,
                ),
            };

            if let Some(player) = self.registry.get_mut(id) {
                match outcome {
                    Outcome::Correct => player.correct_count += 1,
                    Outcome::Incorrect | Outcome::Unanswered => player.incorrect_count += 1,
                }
                last_answers.push(json!({
                    "name": player.display_name.clone().unwrap_or_else(|| player.id.clone()),
                    "answer": answer_value,
                    "is_correct": is_correct,
                }));
            }
            self.hub.send_to(id, &line);
        }

        let payload = json!({
            "correct": correct,
            "lastanswers": last_answers,
        });
        self.hub.resolve_responders(&payload);

        // Interactive players see the leaderboard right away; polled waiters
        // get the scores payload once the display delay elapses.
        self.send_leaderboard_lines();
        let epoch = self.epoch;
        let delay = self.config.display_delay;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionMessage::LeaderboardDue { epoch });
        });

        match self.catalog.get(index + 1) {
            Some(next) => info!("next question: {}", next.text),
            None => warn!("that was the last question"),
        }
    }

    /// Validated single entry point for answer writes.
    fn submit_answer(
        &mut self,
        id: &str,
        name: Option<&str>,
        kind: TransportKind,
        choice: u8,
    ) -> SubmitOutcome {
        if self.state != RoundState::QuestionOpen {
            return SubmitOutcome::RoundNotOpen {
                started: self.started(),
            };
        }
        let question = match self.current_question.and_then(|i| self.catalog.get(i)) {
            Some(q) => q.clone(),
            None => {
                return SubmitOutcome::RoundNotOpen {
                    started: self.started(),
                }
            }
        };

        if self.registry.get(id).is_none() {
            // Reconnect leniency: an answer for an unknown session id gets a
            // fresh player rather than an error.
            warn!("{} - missing state, reinitializing", id);
            let player = self.registry.ensure(id, kind);
            if let Some(name) = name {
                player.display_name = Some(name.to_string());
            }
        }

        let previous = self.registry.record_answer(&question, id, choice);
        SubmitOutcome::Accepted { choice, previous }
    }

    fn broadcast_leaderboard(&mut self, polled_only: bool) {
        if !polled_only {
            self.send_leaderboard_lines();
        }
        let payload = json!({ "scores": scoring::rank(&self.registry) });
        self.hub.resolve_responders(&payload);
    }

    fn send_leaderboard_lines(&mut self) {
        let entries = scoring::rank(&self.registry);
        self.hub.broadcast_line("");
        self.hub.broadcast_line("Leaderboard");
        info!("Leaderboard");
        for entry in &entries {
            let line = format!(
                "{}. {}: {} correct, {} wrong",
                entry.rank, entry.name, entry.correct, entry.wrong
            );
            self.hub.broadcast_line(&line);
            info!("{}", line);
        }
        self.hub.broadcast_line("");
    }

    fn kick(&mut self, name_or_id: &str) {
        match self.registry.remove(name_or_id) {
            Some(player) => {
                self.hub.close(&player.id);
                info!("kicked {} ({})", name_or_id, player.id);
            }
            None => warn!("kick: no player matching '{}'", name_or_id),
        }
    }

    fn started(&self) -> bool {
        self.state != RoundState::Idle
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            round: self.current_question.map(|i| i as i64).unwrap_or(-1),
            started: self.started(),
            scores: scoring::rank(&self.registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn catalog() -> QuestionCatalog {
        QuestionCatalog::parse(Cursor::new(
            "A?|a1|a2|a3|a4|1|-\nB?|b1|b2|b3|b4|2|-\n",
        ))
        .unwrap()
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            round_duration: Duration::from_secs(60),
            display_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_start_with_invalid_index_is_a_noop() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Goto(99)));
        assert_eq!(session.state, RoundState::Idle);
        assert_eq!(session.current_question, None);
        assert_eq!(session.epoch, 0);
    }

    #[tokio::test]
    async fn test_next_from_idle_opens_question_zero() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Next));
        assert_eq!(session.state, RoundState::QuestionOpen);
        assert_eq!(session.current_question, Some(0));
    }

    #[tokio::test]
    async fn test_restart_bumps_epoch_and_resets_answers() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Start));
        let first_epoch = session.epoch;

        let (reply, mut rx) = oneshot::channel();
        session.handle_message(SessionMessage::SubmitAnswer {
            id: "p1".to_string(),
            name: Some("alice".to_string()),
            kind: TransportKind::Polled,
            choice: 1,
            reply,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            SubmitOutcome::Accepted { choice: 1, previous: None }
        ));

        session.handle_message(SessionMessage::Admin(AdminCommand::Next));
        assert!(session.epoch > first_epoch);
        assert!(session.registry.get("p1").unwrap().current_answer.is_none());
        assert!(session.registry.get("p1").unwrap().answered_at.is_none());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_close_new_round() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Start));
        let stale_epoch = session.epoch;
        session.handle_message(SessionMessage::Admin(AdminCommand::Next));

        session.handle_message(SessionMessage::TimerFired { epoch: stale_epoch });
        assert_eq!(session.state, RoundState::QuestionOpen);
        assert_eq!(session.current_question, Some(1));
    }

    #[tokio::test]
    async fn test_submit_rejected_outside_open_round() {
        let mut session = GameSession::new(catalog(), test_config());

        let (reply, mut rx) = oneshot::channel();
        session.handle_message(SessionMessage::SubmitAnswer {
            id: "p1".to_string(),
            name: None,
            kind: TransportKind::Polled,
            choice: 2,
            reply,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            SubmitOutcome::RoundNotOpen { started: false }
        );

        session.handle_message(SessionMessage::Admin(AdminCommand::Start));
        session.handle_message(SessionMessage::TimerFired { epoch: session.epoch });
        assert_eq!(session.state, RoundState::QuestionClosed);

        let (reply, mut rx) = oneshot::channel();
        session.handle_message(SessionMessage::SubmitAnswer {
            id: "p1".to_string(),
            name: None,
            kind: TransportKind::Polled,
            choice: 2,
            reply,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            SubmitOutcome::RoundNotOpen { started: true }
        );
    }

    #[tokio::test]
    async fn test_close_updates_counters_and_outcomes() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Start));

        for (id, choice) in [("winner", 1u8), ("loser", 3u8)] {
            let (reply, _rx) = oneshot::channel();
            session.handle_message(SessionMessage::SubmitAnswer {
                id: id.to_string(),
                name: Some(id.to_string()),
                kind: TransportKind::Polled,
                choice,
                reply,
            });
        }
        // A third player registers but never answers.
        session.handle_message(SessionMessage::RegisterName {
            id: "silent".to_string(),
            name: "silent".to_string(),
            kind: TransportKind::Polled,
        });

        session.handle_message(SessionMessage::TimerFired { epoch: session.epoch });

        let winner = session.registry.get("winner").unwrap();
        assert_eq!((winner.correct_count, winner.incorrect_count), (1, 0));
        let loser = session.registry.get("loser").unwrap();
        assert_eq!((loser.correct_count, loser.incorrect_count), (0, 1));
        let silent = session.registry.get("silent").unwrap();
        assert_eq!((silent.correct_count, silent.incorrect_count), (0, 1));
    }

    #[tokio::test]
    async fn test_force_close_scores_like_a_timer_fire() {
        let mut session = GameSession::new(catalog(), test_config());
        session.handle_message(SessionMessage::Admin(AdminCommand::Close));
        assert_eq!(session.state, RoundState::Idle);

        session.handle_message(SessionMessage::Admin(AdminCommand::Start));
        let (reply, _rx) = oneshot::channel();
        session.handle_message(SessionMessage::SubmitAnswer {
            id: "p1".to_string(),
            name: Some("alice".to_string()),
            kind: TransportKind::Polled,
            choice: 1,
            reply,
        });

        session.handle_message(SessionMessage::Admin(AdminCommand::Close));
        assert_eq!(session.state, RoundState::QuestionClosed);
        assert_eq!(session.registry.get("p1").unwrap().correct_count, 1);

        // A second close is a no-op; counters stay put.
        session.handle_message(SessionMessage::Admin(AdminCommand::Close));
        assert_eq!(session.registry.get("p1").unwrap().correct_count, 1);
    }

    #[tokio::test]
    async fn test_snapshot_before_start() {
        let mut session = GameSession::new(catalog(), test_config());
        let (reply, mut rx) = oneshot::channel();
        session.handle_message(SessionMessage::Snapshot { reply });
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.round, -1);
        assert!(!snapshot.started);
        assert!(snapshot.scores.is_empty());
    }
}
