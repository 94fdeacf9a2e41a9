//! In-process implementations of the OS capability seams.
//!
//! The engine consumes the foreground-observation, foreground-event, and
//! modal-presentation capabilities through traits; real implementations
//! belong to the embedding application. The scripted members here stand in
//! for them in tests and in the CLI's foreground run mode.

pub mod scripted;
