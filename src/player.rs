//! Player state and registry management
//!
//! The registry is the only mutable shared structure in the engine. Every
//! external trigger reaches it through the session's entry points; transports
//! never hold a reference to it. Score counters live for the whole session,
//! while `current_answer`/`answered_at` are reset at the start of each round.

use crate::catalog::{Question, SpecialMode};
use log::{debug, info};
use std::collections::HashMap;
use std::time::Instant;

/// How a player is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent line-oriented TCP session.
    Interactive,
    /// JSON request/response with long-polling.
    Polled,
}

/// One participant, keyed by an opaque session identifier (remote IP for
/// interactive players, the `sessionid` header for polled ones).
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    /// Unset until the player registers a name; unnamed players are kept in
    /// the registry but excluded from the leaderboard.
    pub display_name: Option<String>,
    pub transport: TransportKind,
    pub correct_count: u32,
    pub incorrect_count: u32,
    /// Round-scoped. Only writable while a question is open.
    pub current_answer: Option<u8>,
    /// Round-scoped. See [`PlayerRegistry::record_answer`] for the stamping
    /// rules.
    pub answered_at: Option<Instant>,
    pub connected: bool,
}

impl Player {
    pub fn new(id: String, transport: TransportKind) -> Self {
        Self {
            id,
            display_name: None,
            transport,
            correct_count: 0,
            incorrect_count: 0,
            current_answer: None,
            answered_at: None,
            connected: true,
        }
    }
}

/// Mapping from session identifier to player record.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: HashMap<String, Player>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the player for `id`, creating a fresh record if none exists.
    ///
    /// Lazy creation is deliberate leniency for reconnect races: an answer
    /// arriving for an unknown session id gets a fresh player instead of an
    /// error.
    pub fn ensure(&mut self, id: &str, transport: TransportKind) -> &mut Player {
        self.players
            .entry(id.to_string())
            .or_insert_with(|| Player::new(id.to_string(), transport))
    }

    /// Creates or overwrites a player record with the given name. Counters
    /// reset on overwrite, matching re-registration semantics.
    pub fn register(&mut self, id: &str, name: &str, transport: TransportKind) {
        let mut player = Player::new(id.to_string(), transport);
        player.display_name = Some(name.to_string());
        info!("{} - registered ({:?})", name, transport);
        self.players.insert(id.to_string(), player);
    }

    /// Sets the display name on an existing player, creating one if needed.
    /// Unlike [`register`](Self::register), counters are preserved; this is
    /// the `change_name` path for interactive players.
    pub fn set_name(&mut self, id: &str, name: &str, transport: TransportKind) {
        let player = self.ensure(id, transport);
        player.display_name = Some(name.to_string());
        info!("{} - name set to {}", id, name);
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    /// Clears every player's round-scoped fields. Called when a new round
    /// opens, regardless of what the previous round left behind.
    pub fn reset_round(&mut self) {
        for player in self.players.values_mut() {
            player.current_answer = None;
            player.answered_at = None;
        }
    }

    /// Records an answer for an open round.
    ///
    /// Timestamp rules are asymmetric on purpose:
    /// - `TargetFastest` races on the first commit: `answered_at` is stamped
    ///   only on the player's first answer of the round, and only when that
    ///   answer hits the target slot. Later changes never restamp.
    /// - Every other mode stamps on each submission, so a changed answer
    ///   carries the change time ("last choice" semantics).
    ///
    /// Returns the previous answer so transports can phrase their feedback.
    pub fn record_answer(&mut self, question: &Question, id: &str, choice: u8) -> Option<u8> {
        let target = question.target();
        let player = match self.players.get_mut(id) {
            Some(p) => p,
            None => return None,
        };

        let previous = player.current_answer;
        match question.special_mode {
            SpecialMode::TargetFastest => {
                if previous.is_none() && choice == target {
                    player.answered_at = Some(Instant::now());
                }
            }
            _ => {
                player.answered_at = Some(Instant::now());
            }
        }
        player.current_answer = Some(choice);

        match previous {
            None => debug!("{} sets answer to {}", id, choice),
            Some(p) => debug!("{} changes answer from {} to {}", id, p, choice),
        }
        previous
    }

    pub fn mark_disconnected(&mut self, id: &str) {
        if let Some(player) = self.players.get_mut(id) {
            player.connected = false;
        }
    }

    /// Removes a player by display name or session id. Returns the removed
    /// record when a match existed.
    pub fn remove(&mut self, name_or_id: &str) -> Option<Player> {
        let key = if self.players.contains_key(name_or_id) {
            Some(name_or_id.to_string())
        } else {
            self.players
                .values()
                .find(|p| p.display_name.as_deref() == Some(name_or_id))
                .map(|p| p.id.clone())
        };

        let removed = key.and_then(|k| self.players.remove(&k));
        if let Some(player) = &removed {
            info!("removed player {} ({})", name_or_id, player.id);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
