//! Infrastructure layer for Waypoint.
//!
//! Contains implementations of the traits defined in `waypoint-core`: the
//! file and SQLite checkpoint stores, the filesystem output store, and the
//! subprocess and HTTP tool invokers.

pub mod checkpoint;
pub mod config;
pub mod filesystem;
pub mod output;
pub mod sqlite;
pub mod tool;
