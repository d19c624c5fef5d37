use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

const ESC: u8 = 0x1b;

/// Turns raw terminal input bytes into key events.
///
/// Incomplete escape sequences and UTF-8 characters at the end of a chunk
/// are held until the next chunk. That includes a lone trailing ESC, which
/// may be the start of a sequence split across reads; [`flush`](Self::flush)
/// reports it as the escape key once no more input follows.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
}

enum Parsed {
    Key(KeyEvent, usize),
    Skip(usize),
    Incomplete,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Vec<KeyEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut offset = 0;
        while offset < self.pending.len() {
            match parse_one(&self.pending[offset..]) {
                Parsed::Key(event, used) => {
                    events.push(event);
                    offset += used;
                }
                Parsed::Skip(used) => offset += used,
                Parsed::Incomplete => break,
            }
        }
        self.pending.drain(..offset);
        events
    }

    /// Called when input goes quiet. A held lone ESC becomes the escape key;
    /// other partial input stays pending.
    pub fn flush(&mut self) -> Vec<KeyEvent> {
        if self.pending.as_slice() == [ESC] {
            self.pending.clear();
            return vec![key(KeyCode::Esc)];
        }
        Vec::new()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn parse_one(bytes: &[u8]) -> Parsed {
    let first = bytes[0];
    match first {
        ESC => parse_escape(bytes),
        b'\r' | b'\n' => Parsed::Key(key(KeyCode::Enter), 1),
        b'\t' => Parsed::Key(key(KeyCode::Tab), 1),
        0x7f | 0x08 => Parsed::Key(key(KeyCode::Backspace), 1),
        0x01..=0x1a => {
            let letter = char::from(b'a' + first - 1);
            Parsed::Key(KeyEvent::new(KeyCode::Char(letter), KeyModifiers::CONTROL), 1)
        }
        0x00 | 0x1c..=0x1f => Parsed::Skip(1),
        0x20..=0x7e => Parsed::Key(key(KeyCode::Char(char::from(first))), 1),
        _ => parse_utf8(bytes),
    }
}

fn parse_escape(bytes: &[u8]) -> Parsed {
    let Some(&next) = bytes.get(1) else {
        return Parsed::Incomplete;
    };
    match next {
        b'[' => parse_csi(bytes),
        b'O' => match bytes.get(2) {
            None => Parsed::Incomplete,
            Some(&final_byte) => match cursor_key(final_byte) {
                Some(code) => Parsed::Key(key(code), 3),
                None => Parsed::Skip(3),
            },
        },
        ESC => Parsed::Key(key(KeyCode::Esc), 1),
        0x20..=0x7e => Parsed::Key(
            KeyEvent::new(KeyCode::Char(char::from(next)), KeyModifiers::ALT),
            2,
        ),
        _ => Parsed::Key(key(KeyCode::Esc), 1),
    }
}

fn cursor_key(final_byte: u8) -> Option<KeyCode> {
    match final_byte {
        b'A' => Some(KeyCode::Up),
        b'B' => Some(KeyCode::Down),
        b'C' => Some(KeyCode::Right),
        b'D' => Some(KeyCode::Left),
        b'H' => Some(KeyCode::Home),
        b'F' => Some(KeyCode::End),
        _ => None,
    }
}

fn parse_csi(bytes: &[u8]) -> Parsed {
    // ESC [ params final, where final is in 0x40..=0x7e.
    let Some(end) = bytes[2..].iter().position(|b| (0x40..=0x7e).contains(b)) else {
        return Parsed::Incomplete;
    };
    let final_index = 2 + end;
    let params = &bytes[2..final_index];
    let used = final_index + 1;
    let final_byte = bytes[final_index];

    if final_byte == b'Z' {
        return Parsed::Key(KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT), used);
    }
    if let Some(code) = cursor_key(final_byte) {
        return Parsed::Key(key(code), used);
    }
    if final_byte == b'~' {
        let first_param = params.split(|b| *b == b';').next().unwrap_or_default();
        let code = match first_param {
            b"1" | b"7" => Some(KeyCode::Home),
            b"2" => Some(KeyCode::Insert),
            b"3" => Some(KeyCode::Delete),
            b"4" | b"8" => Some(KeyCode::End),
            b"5" => Some(KeyCode::PageUp),
            b"6" => Some(KeyCode::PageDown),
            _ => None,
        };
        if let Some(code) = code {
            return Parsed::Key(key(code), used);
        }
    }
    Parsed::Skip(used)
}

fn parse_utf8(bytes: &[u8]) -> Parsed {
    let width = match bytes[0] {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Parsed::Skip(1),
    };
    if bytes.len() < width {
        return Parsed::Incomplete;
    }
    match std::str::from_utf8(&bytes[..width])
        .ok()
        .and_then(|text| text.chars().next())
    {
        Some(ch) => Parsed::Key(key(KeyCode::Char(ch)), width),
        None => Parsed::Skip(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(events: &[KeyEvent]) -> Vec<(KeyCode, KeyModifiers)> {
        events.iter().map(|e| (e.code, e.modifiers)).collect()
    }

    #[test]
    fn decodes_navigation_keys() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.decode(b"\t\x1b[Z\r\x1b[A\x1b[Bj2\x03");
        assert_eq!(
            codes(&events),
            vec![
                (KeyCode::Tab, KeyModifiers::NONE),
                (KeyCode::BackTab, KeyModifiers::SHIFT),
                (KeyCode::Enter, KeyModifiers::NONE),
                (KeyCode::Up, KeyModifiers::NONE),
                (KeyCode::Down, KeyModifiers::NONE),
                (KeyCode::Char('j'), KeyModifiers::NONE),
                (KeyCode::Char('2'), KeyModifiers::NONE),
                (KeyCode::Char('c'), KeyModifiers::CONTROL),
            ]
        );
    }

    #[test]
    fn lone_escape_waits_for_quiet_input() {
        let mut decoder = KeyDecoder::new();
        assert!(decoder.decode(b"\x1b").is_empty());
        assert!(decoder.has_pending());
        assert_eq!(codes(&decoder.flush()), vec![(KeyCode::Esc, KeyModifiers::NONE)]);
        assert!(!decoder.has_pending());
        assert!(decoder.flush().is_empty());
        assert_eq!(
            codes(&decoder.decode(b"\x1bq")),
            vec![(KeyCode::Char('q'), KeyModifiers::ALT)]
        );
    }

    #[test]
    fn arrow_split_after_escape_is_still_an_arrow() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(codes(&decoder.decode(b"j\x1b")), vec![(KeyCode::Char('j'), KeyModifiers::NONE)]);
        assert_eq!(codes(&decoder.decode(b"[A")), vec![(KeyCode::Up, KeyModifiers::NONE)]);
    }

    #[test]
    fn double_escape_reports_the_first_at_once() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(codes(&decoder.decode(b"\x1b\x1b")), vec![(KeyCode::Esc, KeyModifiers::NONE)]);
        assert_eq!(codes(&decoder.flush()), vec![(KeyCode::Esc, KeyModifiers::NONE)]);
    }

    #[test]
    fn split_sequences_resume_on_next_chunk() {
        let mut decoder = KeyDecoder::new();
        assert!(decoder.decode(b"\x1b[5").is_empty());
        assert!(decoder.flush().is_empty(), "partial sequences survive a quiet poll");
        assert_eq!(codes(&decoder.decode(b"~")), vec![(KeyCode::PageUp, KeyModifiers::NONE)]);

        let arrow = "→".as_bytes();
        assert!(decoder.decode(&arrow[..1]).is_empty());
        assert_eq!(
            codes(&decoder.decode(&arrow[1..])),
            vec![(KeyCode::Char('→'), KeyModifiers::NONE)]
        );
    }

    #[test]
    fn unknown_sequences_are_dropped() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.decode(b"\x1b[200~x\x1bOP");
        assert_eq!(codes(&events), vec![(KeyCode::Char('x'), KeyModifiers::NONE)]);
    }
}
