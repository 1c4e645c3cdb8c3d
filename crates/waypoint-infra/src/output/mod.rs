//! Step output storage backends.

pub mod fs;
