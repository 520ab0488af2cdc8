//! Minimal SGF writer for finished games.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use time::OffsetDateTime;

use crate::config::GameSettings;
use crate::error::Error;
use crate::game::{GameOverReason, GameResult, Winner};
use crate::gtp::Color;

const SGF_APP: &str = concat!("gtp-run:", env!("CARGO_PKG_VERSION"));

pub struct SgfGame {
    settings: GameSettings,
    white_name: String,
    black_name: String,
    game_name: String,
    event_name: String,
    dates_iso: String,
    moves: String,
    blacks_turn: bool,
    result: String,
}

impl SgfGame {
    pub fn new(
        settings: &GameSettings,
        white_name: &str,
        black_name: &str,
        game_name: &str,
        event_name: &str,
    ) -> SgfGame {
        SgfGame {
            settings: settings.clone(),
            white_name: white_name.to_string(),
            black_name: black_name.to_string(),
            game_name: game_name.to_string(),
            event_name: event_name.to_string(),
            dates_iso: today_iso(),
            moves: String::new(),
            blacks_turn: true,
            result: "?".to_string(),
        }
    }

    /// Append one move in GTP notation. Long games spanning midnight get
    /// every date they touch listed in the DT property.
    pub fn add_move(&mut self, coord: &str) {
        let today = today_iso();
        if !self.dates_iso.contains(&today) {
            self.dates_iso.push(',');
            self.dates_iso.push_str(&today);
        }
        let color = if self.blacks_turn {
            Color::Black
        } else {
            Color::White
        };
        let vertex = if coord.eq_ignore_ascii_case("pass") {
            String::new()
        } else {
            sgf_vertex(coord, self.settings.board_size)
        };
        self.moves.push_str(&format!(";{color}[{vertex}]\n"));
        self.blacks_turn = !self.blacks_turn;
    }

    pub fn set_result(&mut self, result: &GameResult) {
        self.result = match result.winner {
            Winner::White => format!("W+{}", plus_text(&result.reason)),
            Winner::Black => format!("B+{}", plus_text(&result.reason)),
            Winner::Jigo => "0".to_string(),
            Winner::None => "?".to_string(),
        };
    }

    /// Write to `<dir>/<game name>.sgf` with spaces replaced by underscores.
    pub fn write(&self, dir: &Path) -> Result<(), Error> {
        let file_name = format!("{}.sgf", self.game_name.replace(' ', "_"));
        let mut file = File::create(dir.join(file_name)).map_err(Error::Io)?;
        write!(
            file,
            "(;GM[1]FF[4]CA[UTF-8]AP[{}]RU[Chinese]SZ[{}]KM[{}]GN[{}]PW[{}]PB[{}]DT[{}]EV[{}]RE[{}]\n{})\n",
            SGF_APP,
            self.settings.board_size,
            self.settings.komi,
            self.game_name,
            self.white_name,
            self.black_name,
            self.dates_iso,
            self.event_name,
            self.result,
            self.moves
        )
        .map_err(Error::Io)
    }
}

fn plus_text(reason: &GameOverReason) -> String {
    reason.code()
}

fn today_iso() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.date().to_string()
}

/// GTP "Q16" to SGF "pd": columns skip the letter I in GTP but not in
/// SGF, rows count from the top in SGF but from the bottom in GTP.
fn sgf_vertex(coord: &str, board_size: u32) -> String {
    let letters = "abcdefghijklmnopqrstuvwxy";
    let mut chars = coord.chars();
    let col_char = chars
        .next()
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or('a');
    let mut col = (col_char as u8).saturating_sub(b'a') as usize;
    if col > 8 {
        col -= 1;
    }
    let row: u32 = chars.as_str().parse().unwrap_or(0);
    let row = (board_size.saturating_sub(row)) as usize;
    let col = letters.as_bytes().get(col).copied().unwrap_or(b'a') as char;
    let row = letters.as_bytes().get(row).copied().unwrap_or(b'a') as char;
    format!("{col}{row}")
}
