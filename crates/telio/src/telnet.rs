//! Telnet IAC parsing.
//!
//! No option state is tracked. `IacParser` strips control sequences from the byte stream:
//! - `IAC DO|DONT|WILL|WONT <opt>` is dropped (3 bytes),
//! - `IAC IAC` is a literal 0xff,
//! - any other `IAC <cmd>` is dropped (2 bytes).
//!
//! Parser state carries over between `parse` calls, so a sequence split across two reads is
//! completed by the second one. Dropping a parser mid-sequence silently discards the partial
//! bytes.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;

/// Sent once when a session switches to character-at-a-time editing.
///
/// `WILL ECHO` is immediately followed by `DONT ECHO`; both go out as-is.
pub const EDIT_MODE_REQUEST: [u8; 12] = [
    IAC, WILL, OPT_ECHO, IAC, DONT, OPT_ECHO, IAC, WILL, OPT_SGA, IAC, DO, OPT_SGA,
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate,
}

#[derive(Debug, Default)]
pub struct IacParser {
    state: State,
}

impl IacParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a control sequence has been started but not finished.
    pub fn mid_sequence(&self) -> bool {
        self.state != State::Data
    }

    /// Parse a chunk, returning the data bytes with IAC sequences removed.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        self.parse_into(chunk, &mut out);
        out
    }

    /// Like `parse`, appending to an existing buffer.
    pub fn parse_into<E: Extend<u8>>(&mut self, chunk: &[u8], out: &mut E) {
        for &b in chunk {
            match self.state {
                State::Data => {
                    if b == IAC {
                        self.state = State::Iac;
                    } else {
                        out.extend(Some(b));
                    }
                }
                State::Iac => match b {
                    // Escaped 0xff => literal 0xff.
                    IAC => {
                        out.extend(Some(IAC));
                        self.state = State::Data;
                    }
                    // Negotiation commands are 3 bytes: IAC <cmd> <opt>
                    DO | DONT | WILL | WONT => self.state = State::Negotiate,
                    // Other 2-byte IAC commands (NOP, GA, SB, ...) - ignore.
                    _ => self.state = State::Data,
                },
                State::Negotiate => {
                    self.state = State::Data;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_data() {
        let mut p = IacParser::new();
        assert_eq!(p.parse(b"hello\n"), b"hello\n");
        assert!(!p.mid_sequence());
    }

    #[test]
    fn decodes_escaped_iac() {
        let mut p = IacParser::new();
        assert_eq!(p.parse(&[255, 255, b'a']), vec![255, b'a']);
    }

    #[test]
    fn drops_all_negotiation_verbs() {
        let mut p = IacParser::new();
        // IAC WILL 1, IAC DONT 3, IAC DO 24, IAC WONT 31
        let bytes = [
            b'a', 255, 251, 1, b'b', 255, 254, 3, 255, 253, 24, b'c', 255, 252, 31, b'd',
        ];
        assert_eq!(p.parse(&bytes), b"abcd");
    }

    #[test]
    fn drops_two_byte_commands() {
        let mut p = IacParser::new();
        // IAC NOP, IAC GA, IAC SB
        assert_eq!(p.parse(&[b'x', 255, 241, 255, 249, b'y', 255, 250, b'z']), b"xyz");
    }

    #[test]
    fn handles_lone_iac_at_end_of_read() {
        let mut p = IacParser::new();
        assert_eq!(p.parse(&[b'a', 255]), b"a");
        assert!(p.mid_sequence());
        assert_eq!(p.parse(&[255, b'b']), vec![255, b'b']);
        assert!(!p.mid_sequence());
    }

    #[test]
    fn handles_split_negotiation_across_calls() {
        let mut p = IacParser::new();
        assert!(p.parse(&[255, 253]).is_empty());
        assert_eq!(p.parse(&[7, b'z']), b"z");
    }

    #[test]
    fn escaped_iac_and_option_value_255() {
        // The option byte of a negotiation is never data, even when it is 0xff.
        let mut p = IacParser::new();
        assert_eq!(p.parse(&[255, 251, 255, b'q']), b"q");
    }

    #[test]
    fn edit_mode_request_is_four_commands() {
        assert_eq!(EDIT_MODE_REQUEST.chunks(3).count(), 4);
        assert!(EDIT_MODE_REQUEST.chunks(3).all(|c| c[0] == IAC));
        let mut p = IacParser::new();
        assert!(p.parse(&EDIT_MODE_REQUEST).is_empty());
    }
}
