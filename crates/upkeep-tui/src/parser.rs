//! ANSI/VT escape sequence parser.
//!
//! A small state machine covering the subset emitted by typical installer
//! and package-manager output: C0 controls, CSI cursor movement and
//! erasure, SGR styling, and OSC sequences (consumed, never interpreted).
//! Unknown or malformed sequences are swallowed without touching the
//! screen; bytes that are not valid UTF-8 decode to U+FFFD.

/// Maximum number of CSI parameters retained; further ones are dropped.
const MAX_PARAMS: usize = 32;

/// One decoded terminal instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TermAction {
    /// Print a character at the cursor.
    Print(char),
    /// Move the cursor to column 0.
    CarriageReturn,
    /// Move the cursor down one row, scrolling on the bottom row.
    LineFeed,
    /// Move the cursor left one column.
    Backspace,
    /// Advance to the next 8-column tab stop.
    Tab,
    /// Absolute cursor positioning (CSI H / f), 1-based.
    CursorPosition {
        /// 1-based row.
        row: u16,
        /// 1-based column.
        col: u16,
    },
    /// CSI A.
    CursorUp(u16),
    /// CSI B.
    CursorDown(u16),
    /// CSI C.
    CursorForward(u16),
    /// CSI D.
    CursorBack(u16),
    /// CSI K with its parameter (0 = to end, 1 = to start, 2 = whole line).
    EraseInLine(u16),
    /// CSI J with its parameter (0 = below, 1 = above, 2 = all).
    EraseInDisplay(u16),
    /// CSI m with its parameter list (empty input becomes `[0]`).
    Sgr(Vec<u16>),
    /// DECTCEM show/hide cursor (CSI ?25h / ?25l).
    SetCursorVisible(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEsc,
}

/// Incremental escape-sequence parser. Feed it byte chunks in any
/// split; state carries across calls.
#[derive(Debug)]
pub struct Parser {
    state: State,
    params: Vec<u16>,
    current_param: Option<u16>,
    private: bool,
    intermediate: bool,
    utf8_pending: Vec<u8>,
    utf8_needed: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser in the ground state.
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Vec::new(),
            current_param: None,
            private: false,
            intermediate: false,
            utf8_pending: Vec::new(),
            utf8_needed: 0,
        }
    }

    /// Consume a chunk of bytes and return the decoded actions.
    pub fn advance(&mut self, bytes: &[u8]) -> Vec<TermAction> {
        let mut actions = Vec::new();
        for &byte in bytes {
            self.step(byte, &mut actions);
        }
        actions
    }

    fn step(&mut self, byte: u8, actions: &mut Vec<TermAction>) {
        match self.state {
            State::Ground => self.ground(byte, actions),
            State::Escape => self.escape(byte),
            State::Csi => self.csi(byte, actions),
            State::Osc => {
                match byte {
                    0x07 => self.state = State::Ground,
                    0x1b => self.state = State::OscEsc,
                    _ => {}
                }
            }
            State::OscEsc => {
                // Only ESC \ (ST) terminates; anything else resumes the
                // OSC payload.
                self.state = if byte == b'\\' { State::Ground } else { State::Osc };
            }
        }
    }

    fn ground(&mut self, byte: u8, actions: &mut Vec<TermAction>) {
        if self.utf8_needed > 0 {
            if (0x80..0xc0).contains(&byte) {
                self.utf8_pending.push(byte);
                if self.utf8_pending.len() == self.utf8_needed {
                    match std::str::from_utf8(&self.utf8_pending) {
                        Ok(s) => actions.extend(s.chars().map(TermAction::Print)),
                        Err(_) => actions.push(TermAction::Print('\u{FFFD}')),
                    }
                    self.utf8_pending.clear();
                    self.utf8_needed = 0;
                }
                return;
            }
            // Truncated sequence: emit a replacement and reprocess the
            // byte that broke it.
            self.utf8_pending.clear();
            self.utf8_needed = 0;
            actions.push(TermAction::Print('\u{FFFD}'));
        }

        match byte {
            0x1b => self.enter_escape(),
            b'\r' => actions.push(TermAction::CarriageReturn),
            b'\n' => actions.push(TermAction::LineFeed),
            0x08 => actions.push(TermAction::Backspace),
            b'\t' => actions.push(TermAction::Tab),
            // BEL, SI, SO and remaining C0 controls are ignored.
            0x00..=0x1f | 0x7f => {}
            0x20..=0x7e => actions.push(TermAction::Print(byte as char)),
            0x80..=0xff => {
                let needed = match byte {
                    0xc2..=0xdf => 2,
                    0xe0..=0xef => 3,
                    0xf0..=0xf4 => 4,
                    _ => 0,
                };
                if needed == 0 {
                    actions.push(TermAction::Print('\u{FFFD}'));
                } else {
                    self.utf8_pending.push(byte);
                    self.utf8_needed = needed;
                }
            }
        }
    }

    fn enter_escape(&mut self) {
        self.state = State::Escape;
        self.params.clear();
        self.current_param = None;
        self.private = false;
        self.intermediate = false;
    }

    fn escape(&mut self, byte: u8) {
        match byte {
            b'[' => self.state = State::Csi,
            b']' => self.state = State::Osc,
            // Intermediate bytes (charset designations such as ESC ( B)
            // keep us here until the final byte arrives.
            0x20..=0x2f => {}
            0x1b => self.enter_escape(),
            _ => self.state = State::Ground,
        }
    }

    fn csi(&mut self, byte: u8, actions: &mut Vec<TermAction>) {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                let value = self.current_param.unwrap_or(0);
                self.current_param = Some(value.saturating_mul(10).saturating_add(digit));
            }
            b';' => {
                if self.params.len() < MAX_PARAMS {
                    self.params.push(self.current_param.unwrap_or(0));
                }
                self.current_param = None;
            }
            b'?' | b'<' | b'=' | b'>' => self.private = true,
            0x20..=0x2f => self.intermediate = true,
            0x40..=0x7e => {
                if let Some(param) = self.current_param.take() {
                    if self.params.len() < MAX_PARAMS {
                        self.params.push(param);
                    }
                }
                let params = std::mem::take(&mut self.params);
                self.dispatch_csi(byte, params, actions);
                self.state = State::Ground;
            }
            0x1b => self.enter_escape(),
            // Other C0 bytes inside a sequence are dropped.
            _ => {}
        }
    }

    fn dispatch_csi(&mut self, finalb: u8, params: Vec<u16>, actions: &mut Vec<TermAction>) {
        if self.intermediate {
            return;
        }
        let first = params.first().copied();
        let arg = |default: u16| first.filter(|p| *p != 0).unwrap_or(default);

        if self.private {
            if first == Some(25) {
                match finalb {
                    b'h' => actions.push(TermAction::SetCursorVisible(true)),
                    b'l' => actions.push(TermAction::SetCursorVisible(false)),
                    _ => {}
                }
            }
            return;
        }

        match finalb {
            b'H' | b'f' => {
                let row = arg(1);
                let col = params.get(1).copied().filter(|p| *p != 0).unwrap_or(1);
                actions.push(TermAction::CursorPosition { row, col });
            }
            b'A' => actions.push(TermAction::CursorUp(arg(1))),
            b'B' => actions.push(TermAction::CursorDown(arg(1))),
            b'C' => actions.push(TermAction::CursorForward(arg(1))),
            b'D' => actions.push(TermAction::CursorBack(arg(1))),
            b'K' => actions.push(TermAction::EraseInLine(first.unwrap_or(0))),
            b'J' => actions.push(TermAction::EraseInDisplay(first.unwrap_or(0))),
            b'm' => {
                let params = if params.is_empty() { vec![0] } else { params };
                actions.push(TermAction::Sgr(params));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Vec<TermAction> {
        Parser::new().advance(bytes)
    }

    #[test]
    fn plain_text_prints() {
        let actions = parse(b"hi");
        assert_eq!(
            actions,
            vec![TermAction::Print('h'), TermAction::Print('i')]
        );
    }

    #[test]
    fn controls_decode() {
        assert_eq!(parse(b"\r"), vec![TermAction::CarriageReturn]);
        assert_eq!(parse(b"\n"), vec![TermAction::LineFeed]);
        assert_eq!(parse(b"\x08"), vec![TermAction::Backspace]);
        assert_eq!(parse(b"\t"), vec![TermAction::Tab]);
        // BEL, SI, SO are consumed silently.
        assert!(parse(b"\x07\x0e\x0f").is_empty());
    }

    #[test]
    fn cursor_position_defaults_to_origin() {
        assert_eq!(
            parse(b"\x1b[H"),
            vec![TermAction::CursorPosition { row: 1, col: 1 }]
        );
        assert_eq!(
            parse(b"\x1b[3;7f"),
            vec![TermAction::CursorPosition { row: 3, col: 7 }]
        );
    }

    #[test]
    fn relative_moves_default_to_one() {
        assert_eq!(parse(b"\x1b[A"), vec![TermAction::CursorUp(1)]);
        assert_eq!(parse(b"\x1b[5B"), vec![TermAction::CursorDown(5)]);
        assert_eq!(parse(b"\x1b[2C"), vec![TermAction::CursorForward(2)]);
        assert_eq!(parse(b"\x1b[0D"), vec![TermAction::CursorBack(1)]);
    }

    #[test]
    fn erase_parameters_pass_through() {
        assert_eq!(parse(b"\x1b[K"), vec![TermAction::EraseInLine(0)]);
        assert_eq!(parse(b"\x1b[2K"), vec![TermAction::EraseInLine(2)]);
        assert_eq!(parse(b"\x1b[1J"), vec![TermAction::EraseInDisplay(1)]);
    }

    #[test]
    fn sgr_with_no_params_resets() {
        assert_eq!(parse(b"\x1b[m"), vec![TermAction::Sgr(vec![0])]);
        assert_eq!(
            parse(b"\x1b[1;31m"),
            vec![TermAction::Sgr(vec![1, 31])]
        );
        assert_eq!(
            parse(b"\x1b[38;2;10;20;30m"),
            vec![TermAction::Sgr(vec![38, 2, 10, 20, 30])]
        );
    }

    #[test]
    fn cursor_visibility() {
        assert_eq!(parse(b"\x1b[?25l"), vec![TermAction::SetCursorVisible(false)]);
        assert_eq!(parse(b"\x1b[?25h"), vec![TermAction::SetCursorVisible(true)]);
    }

    #[test]
    fn unknown_csi_is_consumed() {
        assert!(parse(b"\x1b[12;34X").is_empty());
        assert_eq!(parse(b"\x1b[999Zok").len(), 2);
    }

    #[test]
    fn unknown_private_mode_is_consumed() {
        assert!(parse(b"\x1b[?2004h").is_empty());
    }

    #[test]
    fn osc_consumed_with_bel_terminator() {
        assert_eq!(
            parse(b"\x1b]0;title\x07after"),
            vec![
                TermAction::Print('a'),
                TermAction::Print('f'),
                TermAction::Print('t'),
                TermAction::Print('e'),
                TermAction::Print('r'),
            ]
        );
    }

    #[test]
    fn osc_consumed_with_st_terminator() {
        assert_eq!(
            parse(b"\x1b]2;x\x1b\\y"),
            vec![TermAction::Print('y')]
        );
    }

    #[test]
    fn charset_designation_is_consumed() {
        assert_eq!(parse(b"\x1b(Bok"), vec![TermAction::Print('o'), TermAction::Print('k')]);
    }

    #[test]
    fn utf8_across_chunk_boundary() {
        let mut parser = Parser::new();
        let bytes = "é".as_bytes();
        assert!(parser.advance(&bytes[..1]).is_empty());
        assert_eq!(parser.advance(&bytes[1..]), vec![TermAction::Print('é')]);
    }

    #[test]
    fn invalid_utf8_becomes_replacement() {
        assert_eq!(parse(&[0xff]), vec![TermAction::Print('\u{FFFD}')]);
        // A truncated two-byte sequence followed by ASCII.
        assert_eq!(
            parse(&[0xc3, b'x']),
            vec![TermAction::Print('\u{FFFD}'), TermAction::Print('x')]
        );
    }

    #[test]
    fn esc_inside_csi_restarts_sequence() {
        assert_eq!(
            parse(b"\x1b[1;\x1b[31m"),
            vec![TermAction::Sgr(vec![31])]
        );
    }
}
