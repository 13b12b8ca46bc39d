//! BidRoom Server - Room-scoped real-time auction relay.
//!
//! This crate provides the relay behind live auction rooms, responsible for:
//! - Admitting connections into rooms as admin, team or spectator
//! - Holding one authoritative auction snapshot per room
//! - Enforcing who may mutate that snapshot
//! - Fanning events out to the members of a single room
//!
//! # Architecture
//!
//! Clients talk to the server over one WebSocket each. The [`relay::Relay`]
//! owns the room store, the joined sessions and the outbound channels, and
//! applies each inbound event to completion before the next one. State lives
//! only in memory and disappears with the last member of a room.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod session;
pub mod types;
