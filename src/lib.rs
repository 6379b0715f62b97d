//! # Quiz Server Library
//!
//! A live trivia-night host: one process drives a shared round of
//! multiple-choice questions to many concurrently connected participants
//! over two transports, collects their answers, scores them and broadcasts
//! results and a leaderboard.
//!
//! ## Architecture
//!
//! The engine is a single-threaded event loop: [`session::GameSession`] owns
//! all mutable state (player registry, round state machine, notification
//! hub) and reacts to messages from an unbounded channel. The three trigger
//! sources — admin commands, round-timer fires and transport events — are
//! serialized onto that channel, so reactions run to completion without
//! locking. Concurrency exists only as multiplicity of connections: each
//! interactive socket and each parked long-poll request is an independent
//! suspension point.
//!
//! Round timers are spawned tasks tagged with the round's epoch; a timer
//! superseded by an admin skipping ahead fires into a bumped epoch and is
//! ignored.
//!
//! ## Module organization
//!
//! - [`catalog`]: question data model and the delimited-file loader
//! - [`player`]: player records and the registry
//! - [`scoring`]: answer evaluation (including the special scoring modes)
//!   and leaderboard ranking, as pure functions
//! - [`session`]: the round state machine and engine event loop
//! - [`hub`]: fan-out of round events to interactive sockets and queued
//!   long-poll responders
//! - [`telnet`]: the interactive line-protocol transport
//! - [`http`]: the polled JSON transport (axum)
//! - [`admin`]: the typed admin command grammar and stdin loop

pub mod admin;
pub mod catalog;
pub mod hub;
pub mod http;
pub mod player;
pub mod scoring;
pub mod session;
pub mod telnet;
