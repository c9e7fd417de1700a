//! `telio`: the byte-level half of a telnet chat session.
//!
//! - `telnet`: IAC stripping that survives sequences split across reads,
//! - `line`: a buffered reader over the cleaned stream, handing out either cooked lines
//!   (menus, logins) or single keystrokes (raw-mode editing) from the same buffer,
//! - `editor`: a sans-IO line editor with a cursor and per-session history.

pub mod editor;
pub mod line;
pub mod telnet;
