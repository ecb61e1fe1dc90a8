//! Domain services used by HTTP routes and the process lifecycle.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the chat pipeline, prompt persistence, and background
//! housekeeping so route handlers stay focused on protocol translation and
//! admin auth.

pub mod prompt;
pub mod responder;
pub mod scheduler;
