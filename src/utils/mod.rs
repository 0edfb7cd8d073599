//! Small cross-cutting helpers shared by the daemon, worker, and CLI.

pub mod env;
