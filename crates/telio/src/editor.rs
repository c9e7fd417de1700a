//! Character-at-a-time line editing for raw-mode telnet sessions.
//!
//! The editor is sans-IO: feed it cleaned bytes one at a time and it reports what changed.
//! Drawing is the caller's job. It only needs [`LineEditor::buffer`] and
//! [`LineEditor::cursor`] after a [`Edit::Redraw`] or [`Edit::Cursor`].
//!
//! Bytes are kept as opaque octets: anything >= 0x80 is inserted as-is and committed lines
//! are decoded lossily as UTF-8.

pub const DEFAULT_MAX_LEN: usize = 1024;

const NUL: u8 = 0x00;
const BS: u8 = 0x08;
const LF: u8 = b'\n';
const CR: u8 = b'\r';
const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

/// Result of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Nothing visible changed.
    None,
    /// Buffer contents changed; redraw the input line.
    Redraw,
    /// Only the cursor moved.
    Cursor,
    /// ENTER was pressed; the finished line.
    Commit(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    Esc,
    Csi,
    /// A CSI sequence that carried parameter or intermediate bytes; its final byte is ignored.
    CsiParams,
}

#[derive(Debug)]
pub struct LineEditor {
    buf: Vec<u8>,
    cursor: usize,
    history: Vec<String>,
    history_pos: usize,
    escape: Escape,
    after_cr: bool,
    max_len: usize,
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            cursor: 0,
            history: Vec::new(),
            history_pos: 0,
            escape: Escape::None,
            after_cr: false,
            max_len: DEFAULT_MAX_LEN,
        }
    }

    pub fn with_max_len(mut self, max: usize) -> Self {
        self.max_len = max.max(1);
        self
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Committed non-empty lines, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Recall position into `history`. Always `history().len()` for now: no key walks it.
    pub fn history_pos(&self) -> usize {
        self.history_pos
    }

    pub fn feed(&mut self, b: u8) -> Edit {
        // CRLF and CR NUL are a single ENTER.
        if std::mem::take(&mut self.after_cr) && matches!(b, LF | NUL) {
            return Edit::None;
        }

        match self.escape {
            Escape::Esc => {
                self.escape = if b == b'[' { Escape::Csi } else { Escape::None };
                return Edit::None;
            }
            Escape::Csi | Escape::CsiParams => {
                // Parameter and intermediate bytes keep the sequence open.
                if (0x20..=0x3f).contains(&b) {
                    self.escape = Escape::CsiParams;
                    return Edit::None;
                }
                let bare = self.escape == Escape::Csi;
                self.escape = Escape::None;
                return match b {
                    b'D' if bare => self.left(),
                    b'C' if bare => self.right(),
                    _ => Edit::None,
                };
            }
            Escape::None => {}
        }

        match b {
            CR | LF => {
                self.after_cr = b == CR;
                Edit::Commit(self.commit())
            }
            DEL | BS => self.backspace(),
            ESC => {
                self.escape = Escape::Esc;
                Edit::None
            }
            0x20..=0x7e | 0x80..=0xff => self.insert(b),
            _ => Edit::None,
        }
    }

    fn insert(&mut self, b: u8) -> Edit {
        if self.buf.len() >= self.max_len {
            return Edit::None;
        }
        self.buf.insert(self.cursor, b);
        self.cursor += 1;
        Edit::Redraw
    }

    fn backspace(&mut self) -> Edit {
        if self.cursor == 0 {
            return Edit::None;
        }
        self.cursor -= 1;
        self.buf.remove(self.cursor);
        Edit::Redraw
    }

    fn left(&mut self) -> Edit {
        if self.cursor == 0 {
            return Edit::None;
        }
        self.cursor -= 1;
        Edit::Cursor
    }

    fn right(&mut self) -> Edit {
        if self.cursor >= self.buf.len() {
            return Edit::None;
        }
        self.cursor += 1;
        Edit::Cursor
    }

    fn commit(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        self.cursor = 0;
        if !line.is_empty() {
            self.history.push(line.clone());
        }
        self.history_pos = self.history.len();
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(ed: &mut LineEditor, bytes: &[u8]) -> Vec<Edit> {
        bytes.iter().map(|b| ed.feed(*b)).collect()
    }

    #[test]
    fn types_and_commits() {
        let mut ed = LineEditor::new();
        let edits = feed_all(&mut ed, b"hi\r");
        assert_eq!(
            edits,
            vec![Edit::Redraw, Edit::Redraw, Edit::Commit("hi".to_string())]
        );
        assert!(ed.buffer().is_empty());
        assert_eq!(ed.cursor(), 0);
        assert_eq!(ed.history(), ["hi".to_string()]);
        assert_eq!(ed.history_pos(), 1);
    }

    #[test]
    fn crlf_and_cr_nul_commit_once() {
        let mut ed = LineEditor::new();
        let commits = feed_all(&mut ed, b"a\r\nb\r\0c\n\n")
            .into_iter()
            .filter(|e| matches!(e, Edit::Commit(_)))
            .collect::<Vec<_>>();
        assert_eq!(
            commits,
            vec![
                Edit::Commit("a".to_string()),
                Edit::Commit("b".to_string()),
                Edit::Commit("c".to_string()),
                Edit::Commit(String::new()),
            ]
        );
    }

    #[test]
    fn empty_commit_skips_history() {
        let mut ed = LineEditor::new();
        assert_eq!(ed.feed(b'\n'), Edit::Commit(String::new()));
        assert!(ed.history().is_empty());
        assert_eq!(ed.history_pos(), 0);
    }

    #[test]
    fn arrows_move_and_insert_mid_line() {
        let mut ed = LineEditor::new();
        feed_all(&mut ed, b"ac");
        assert_eq!(feed_all(&mut ed, b"\x1b[D"), vec![Edit::None, Edit::None, Edit::Cursor]);
        assert_eq!(ed.cursor(), 1);
        assert_eq!(ed.feed(b'b'), Edit::Redraw);
        assert_eq!(ed.buffer(), b"abc");
        assert_eq!(ed.cursor(), 2);
        feed_all(&mut ed, b"\x1b[C");
        assert_eq!(ed.cursor(), 3);
        // Already at the end.
        assert_eq!(feed_all(&mut ed, b"\x1b[C")[2], Edit::None);
    }

    #[test]
    fn backspace_removes_before_cursor() {
        let mut ed = LineEditor::new();
        feed_all(&mut ed, b"abc\x1b[D");
        assert_eq!(ed.feed(0x7f), Edit::Redraw);
        assert_eq!(ed.buffer(), b"ac");
        assert_eq!(ed.cursor(), 1);
        assert_eq!(ed.feed(0x08), Edit::Redraw);
        assert_eq!(ed.buffer(), b"c");
        assert_eq!(ed.feed(0x08), Edit::None);
        assert_eq!(ed.cursor(), 0);
    }

    #[test]
    fn unknown_escapes_are_swallowed() {
        let mut ed = LineEditor::new();
        // Up arrow, then ESC followed by a plain letter.
        feed_all(&mut ed, b"\x1b[Az\x1bqy");
        assert_eq!(ed.buffer(), b"zy");
        assert_eq!(ed.cursor(), 2);
    }

    #[test]
    fn arrows_with_parameters_do_not_move() {
        let mut ed = LineEditor::new();
        // Ctrl-left and shift-right carry parameters.
        feed_all(&mut ed, b"ab\x1b[1;5D\x1b[1;2Cz");
        assert_eq!(ed.buffer(), b"abz");
        assert_eq!(ed.cursor(), 3);

        feed_all(&mut ed, b"\x1b[D\x1b[Dx");
        assert_eq!(ed.buffer(), b"axbz");
        assert_eq!(ed.cursor(), 2);
    }

    #[test]
    fn control_bytes_ignored_and_high_bytes_kept() {
        let mut ed = LineEditor::new();
        feed_all(&mut ed, &[0x01, b'x', 0x07, 0xc3, 0xa9]);
        assert_eq!(ed.buffer(), &[b'x', 0xc3, 0xa9]);
        assert_eq!(ed.feed(b'\r'), Edit::Commit("xé".to_string()));
    }

    #[test]
    fn max_len_caps_inserts() {
        let mut ed = LineEditor::new().with_max_len(3);
        let edits = feed_all(&mut ed, b"abcd");
        assert_eq!(edits[3], Edit::None);
        assert_eq!(ed.buffer(), b"abc");
    }

    #[test]
    fn cursor_stays_in_bounds() {
        // Small LCG so the sequence is deterministic.
        let mut seed: u32 = 0x2545_f491;
        let alphabet: &[&[u8]] = &[b"a", b"Z", b"\x7f", b"\x08", b"\x1b[D", b"\x1b[C", b"\r", b"\xff"];
        let mut ed = LineEditor::new().with_max_len(32);
        for _ in 0..5000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let pick = alphabet[(seed >> 16) as usize % alphabet.len()];
            for b in pick {
                ed.feed(*b);
                assert!(ed.cursor() <= ed.buffer().len());
            }
        }
    }
}
