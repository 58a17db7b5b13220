//! Process execution seams and their test doubles.
//!
//! `runner` runs local shell commands (ssh and rsync included), `tmux`
//! builds the session commands that keep a scan alive on the instance, and
//! `mock` holds the scripted collaborators used by scenario tests.

pub mod mock;
pub mod runner;
pub mod tmux;
