//! GTP 2 protocol primitives: colors, vertex checks and response
//! classification. The transport submodule turns a subprocess's pipes into
//! a request/response channel.

pub mod transport;

use std::fmt;

use crate::error::GtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn flip(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // GTP color tokens are the single letters B/W.
        match *self {
            Color::Black => write!(f, "B"),
            Color::White => write!(f, "W"),
        }
    }
}

/// Classify a complete, right-trimmed GTP response: `=`-prefixed success
/// yields the payload, `?`-prefixed failure maps the well-known failure
/// texts to dedicated error kinds.
pub fn parse_response(text: &str) -> Result<String, GtpError> {
    if let Some(rest) = text.strip_prefix('=') {
        return Ok(rest.trim().to_string());
    }
    if let Some(rest) = text.strip_prefix('?') {
        let msg = rest.trim();
        let lower = msg.to_ascii_lowercase();
        return Err(if lower.starts_with("illegal move") {
            GtpError::IllegalMove
        } else if lower.starts_with("cannot score") {
            GtpError::CannotScore
        } else if lower.starts_with("unknown command") {
            GtpError::UnknownCommand
        } else {
            GtpError::ResponseError(msg.to_string())
        });
    }
    Err(GtpError::ResponseError(text.to_string()))
}

/// Whether `coord` is a syntactically valid move for the given board size:
/// `pass`, `resign`, or a vertex like `Q16` (column letters skip `I`).
pub fn valid_move(coord: &str, board_size: u32) -> bool {
    if coord.eq_ignore_ascii_case("pass") || coord.eq_ignore_ascii_case("resign") {
        return true;
    }
    let lower = coord.to_ascii_lowercase();
    let mut chars = lower.chars();
    let col = match chars.next() {
        Some(c) if c.is_ascii_lowercase() && c != 'i' => c,
        _ => return false,
    };
    let mut col_idx = col as u32 - 'a' as u32;
    if col_idx > 8 {
        col_idx -= 1;
    }
    let row: u32 = match chars.as_str().parse() {
        Ok(n) => n,
        Err(_) => return false,
    };
    col_idx < board_size && row >= 1 && row <= board_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_responses() {
        assert_eq!("C3", parse_response("= C3").expect("success response"));
        assert_eq!("", parse_response("=").expect("empty success response"));
        let listing = parse_response("= boardsize\nkomi\nplay").expect("multiline response");
        assert_eq!("boardsize\nkomi\nplay", listing);
    }

    #[test]
    fn failure_responses() {
        match parse_response("? illegal move") {
            Err(GtpError::IllegalMove) => {}
            r => unreachable!("unexpected {:?}", r),
        }
        match parse_response("? cannot score") {
            Err(GtpError::CannotScore) => {}
            r => unreachable!("unexpected {:?}", r),
        }
        match parse_response("? unknown command") {
            Err(GtpError::UnknownCommand) => {}
            r => unreachable!("unexpected {:?}", r),
        }
        match parse_response("? out of memory") {
            Err(GtpError::ResponseError(ref msg)) => assert_eq!("out of memory", msg),
            r => unreachable!("unexpected {:?}", r),
        }
        match parse_response("gibberish") {
            Err(GtpError::ResponseError(_)) => {}
            r => unreachable!("unexpected {:?}", r),
        }
    }

    #[test]
    fn vertex_validation() {
        assert!(valid_move("Q16", 19));
        assert!(valid_move("a1", 19));
        assert!(valid_move("T19", 19));
        assert!(valid_move("pass", 19));
        assert!(valid_move("RESIGN", 19));
        // I is skipped in GTP coordinates.
        assert!(!valid_move("I5", 19));
        // J on a 9x9 board is the 9th column, just inside.
        assert!(valid_move("J9", 9));
        assert!(!valid_move("K9", 9));
        assert!(!valid_move("A0", 19));
        assert!(!valid_move("A20", 19));
        assert!(!valid_move("5A", 19));
        assert!(!valid_move("", 19));
    }

    #[test]
    fn color_tokens() {
        assert_eq!("B", Color::Black.to_string());
        assert_eq!("W", Color::White.to_string());
        assert_eq!(Color::White, Color::Black.flip());
    }
}
