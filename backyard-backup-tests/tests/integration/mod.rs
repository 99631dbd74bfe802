//! Integration tests for backyard-backup
//!
//! The sqlite tests run everywhere. Server engine tests need the client
//! tools and a reachable server.
//! Run them with: `cargo test -p backyard-backup-tests --test integration -- --ignored`

mod local_storage;
mod servers;
mod sqlite;
