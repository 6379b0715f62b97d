//! Answer evaluation and leaderboard ranking
//!
//! Both halves are pure functions over the registry so the round state
//! machine stays free of rule logic and the rules stay trivially testable.

use crate::catalog::{Question, SpecialMode};
use crate::player::{Player, PlayerRegistry};
use std::collections::HashMap;

/// Per-player result of a closed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Correct,
    Incorrect,
    /// Never answered. Distinct from `Incorrect` for display text, but both
    /// count against the player.
    Unanswered,
}

/// Result of evaluating one question over the full registry.
#[derive(Debug)]
pub struct Evaluation {
    /// The choice displayed to players as "the" answer. For `FewestChosen`
    /// this is the lowest-numbered choice achieving the minimum tally; for
    /// the target modes it is the target slot.
    pub canonical_choice: u8,
    /// Outcome per player id, covering every registered player.
    pub outcomes: HashMap<String, Outcome>,
}

/// Scores the just-closed question for every registered player.
pub fn evaluate(question: &Question, registry: &PlayerRegistry) -> Evaluation {
    match question.special_mode {
        SpecialMode::None => evaluate_default(question, registry),
        SpecialMode::FewestChosen => evaluate_fewest_chosen(registry),
        SpecialMode::TargetFastest => evaluate_target_race(question, registry, Race::Fastest),
        SpecialMode::TargetLatest => evaluate_target_race(question, registry, Race::Latest),
    }
}

fn evaluate_default(question: &Question, registry: &PlayerRegistry) -> Evaluation {
    let outcomes = registry
        .iter()
        .map(|player| {
            let outcome = match player.current_answer {
                None => Outcome::Unanswered,
                Some(answer) if answer == question.correct_choice => Outcome::Correct,
                Some(_) => Outcome::Incorrect,
            };
            (player.id.clone(), outcome)
        })
        .collect();

    Evaluation {
        canonical_choice: question.correct_choice,
        outcomes,
    }
}

/// The minimum tally is taken across all four slots, including slots nobody
/// picked. A zero tally therefore "wins" and no answered player scores.
/// Intentional; see the rule notes in DESIGN.md.
fn evaluate_fewest_chosen(registry: &PlayerRegistry) -> Evaluation {
    let mut tally = [0u32; 5];
    for player in registry.iter() {
        if let Some(answer) = player.current_answer {
            tally[answer as usize] += 1;
        }
    }

    let minimum = (1..=4).map(|slot| tally[slot]).min().unwrap_or(0);
    let canonical = (1..=4)
        .find(|&slot| tally[slot] == minimum)
        .unwrap_or(1) as u8;

    let outcomes = registry
        .iter()
        .map(|player| {
            let outcome = match player.current_answer {
                None => Outcome::Unanswered,
                Some(answer) if tally[answer as usize] == minimum => Outcome::Correct,
                Some(_) => Outcome::Incorrect,
            };
            (player.id.clone(), outcome)
        })
        .collect();

    Evaluation {
        canonical_choice: canonical,
        outcomes,
    }
}

enum Race {
    Fastest,
    Latest,
}

/// At most one player wins a target race: the earliest (or latest) committed
/// timestamp among players sitting on the target slot. Everyone else,
/// including players who never answered, is scored incorrect.
fn evaluate_target_race(question: &Question, registry: &PlayerRegistry, race: Race) -> Evaluation {
    let target = question.target();

    let winner: Option<&Player> = registry
        .iter()
        .filter(|p| p.current_answer == Some(target) && p.answered_at.is_some())
        .fold(None, |best: Option<&Player>, candidate| match best {
            None => Some(candidate),
            Some(current) => {
                let keep_candidate = match race {
                    Race::Fastest => candidate.answered_at < current.answered_at,
                    Race::Latest => candidate.answered_at > current.answered_at,
                };
                if keep_candidate {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        });

    let winner_id = winner.map(|p| p.id.as_str());
    let outcomes = registry
        .iter()
        .map(|player| {
            let outcome = if Some(player.id.as_str()) == winner_id {
                Outcome::Correct
            } else {
                Outcome::Incorrect
            };
            (player.id.clone(), outcome)
        })
        .collect();

    Evaluation {
        canonical_choice: target,
        outcomes,
    }
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RankEntry {
    pub rank: u32,
    pub name: String,
    pub correct: u32,
    pub wrong: u32,
}

/// Ranks all named players for display.
///
/// Stable sort by correct count descending, then incorrect count ascending.
/// Players with the same correct count share a rank, and the next distinct
/// correct count advances the rank by exactly one. Unnamed players are
/// excluded.
pub fn rank(registry: &PlayerRegistry) -> Vec<RankEntry> {
    let mut players: Vec<&Player> = registry
        .iter()
        .filter(|p| p.display_name.is_some())
        .collect();
    players.sort_by(|a, b| {
        b.correct_count
            .cmp(&a.correct_count)
            .then(a.incorrect_count.cmp(&b.incorrect_count))
    });

    let mut entries = Vec::with_capacity(players.len());
    let mut rank = 0u32;
    let mut prev_correct: Option<u32> = None;

    for player in players {
        if prev_correct != Some(player.correct_count) {
            rank += 1;
            prev_correct = Some(player.correct_count);
        }
        entries.push(RankEntry {
            rank,
            name: player.display_name.clone().unwrap_or_default(),
            correct: player.correct_count,
            wrong: player.incorrect_count,
        });
    }

    entries
}
