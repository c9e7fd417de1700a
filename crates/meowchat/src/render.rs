//! ANSI painting for the fixed chat layout.
//!
//! Rows `1..=CHAT_ROWS` are a scroll region holding the MOTD header and the newest chat
//! lines, `SEPARATOR_ROW` is a rule and `PROMPT_ROW` holds the prompt and the line being
//! typed. Every full render repaints all of it.

use bytes::Bytes;

use crate::registry::View;

pub const CHAT_ROWS: usize = 21;
pub const SEPARATOR_ROW: usize = 22;
pub const PROMPT_ROW: usize = 23;

pub const PROMPT: &str = "$~/ ";

const HEADER_ROWS: usize = 2;
const SEPARATOR: &str = "-------------------";

/// Screen column (1-based) of the terminal cursor for an input cursor index.
pub fn prompt_col(cursor: usize) -> usize {
    PROMPT.len() + 1 + cursor
}

/// The lines a view would show: everything from its offset, trimmed to what fits.
pub fn visible<'a>(lines: &'a [String], offset: usize) -> &'a [String] {
    let from = &lines[offset.min(lines.len())..];
    let room = CHAT_ROWS - HEADER_ROWS;
    &from[from.len().saturating_sub(room)..]
}

/// Full repaint: clear, header, chat tail, separator, prompt with the pending input.
pub fn screen(motd: &str, lines: &[String], view: &View) -> Bytes {
    let tail = visible(lines, view.offset);
    let mut s = Vec::with_capacity(256 + tail.iter().map(|l| l.len() + 2).sum::<usize>());

    s.extend_from_slice(format!("\x1b[2J\x1b[1;{CHAT_ROWS}r\x1b[1;1H").as_bytes());
    s.extend_from_slice(format!("*** MOTD: {motd} ***\r\n--- Chat ---\r\n").as_bytes());
    for (i, line) in tail.iter().enumerate() {
        if i > 0 {
            s.extend_from_slice(b"\r\n");
        }
        s.extend_from_slice(line.as_bytes());
    }
    s.extend_from_slice(format!("\x1b[{SEPARATOR_ROW};1H\x1b[2K{SEPARATOR}").as_bytes());
    push_input(&mut s, &view.input, view.cursor);
    Bytes::from(s)
}

/// Repaint only the prompt row.
pub fn input_line(input: &[u8], cursor: usize) -> Bytes {
    let mut s = Vec::with_capacity(32 + input.len());
    push_input(&mut s, input, cursor);
    Bytes::from(s)
}

pub fn cursor_to(cursor: usize) -> Bytes {
    Bytes::from(format!("\x1b[{PROMPT_ROW};{}H", prompt_col(cursor)))
}

/// Caller-only output: scrolled in at the bottom of the chat region, gone on the next repaint.
pub fn notice(lines: &[String], view: &View) -> Bytes {
    let mut s = format!("\x1b[{CHAT_ROWS};1H").into_bytes();
    for line in lines {
        s.extend_from_slice(b"\r\n");
        s.extend_from_slice(line.as_bytes());
    }
    s.extend_from_slice(cursor_to(view.cursor).as_ref());
    Bytes::from(s)
}

fn push_input(s: &mut Vec<u8>, input: &[u8], cursor: usize) {
    s.extend_from_slice(format!("\x1b[{PROMPT_ROW};1H\x1b[2K{PROMPT}").as_bytes());
    // One octet per cell: high bytes are shown as their Latin-1 character so the cursor
    // column always matches the editor's byte index.
    for &b in input {
        let mut buf = [0u8; 2];
        s.extend_from_slice(char::from(b).encode_utf8(&mut buf).as_bytes());
    }
    s.extend_from_slice(format!("\x1b[{PROMPT_ROW};{}H", prompt_col(cursor)).as_bytes());
}
