//! `SQLite` database for the Armada control plane.

armada_core::define_database!(ServerDatabase, "Server database migrations complete");

pub use armada_core::db::DatabaseError;
