//! The persistent match record: the result log (one fixed-width line per
//! game, also the source of truth for resuming) and the move-times log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::Error;
use crate::game::{GameOverReason, GameResult, Winner};
use crate::gtp::Color;

const JIGO: &str = "Jigo";
const RES_NONE: &str = "None";

/// One engine's per-game line fields, in config order.
pub struct EngineLine<'a> {
    pub name: &'a str,
    pub color: Color,
    pub moves: u32,
    pub total_time: f64,
    pub max_time: f64,
}

impl<'a> EngineLine<'a> {
    fn average_time(&self) -> f64 {
        if self.moves == 0 {
            0.0
        } else {
            self.total_time / self.moves as f64
        }
    }
}

/// Width of the zero-padded game counter.
pub fn seq_width(num_games: u32) -> usize {
    num_games.to_string().len()
}

/// Width of the winner-name field.
pub fn name_width(names: [&str; 2]) -> usize {
    names
        .iter()
        .map(|n| n.len())
        .chain([JIGO.len(), RES_NONE.len()])
        .max()
        .unwrap()
}

pub fn format_result_line(
    seq: u32,
    seq_width: usize,
    name_width: usize,
    timestamp: &str,
    first: &EngineLine,
    second: &EngineLine,
    result: &GameResult,
) -> String {
    let mut line = format!(
        "[{seq:0seq_width$}] {timestamp} {} {} {} {} = ",
        first.name, first.color, second.name, second.color
    );
    let by_color = |color: Color| {
        if first.color == color {
            first.name
        } else {
            second.name
        }
    };
    match result.winner {
        Winner::White => {
            line.push_str(&format!("{:>name_width$} W+", by_color(Color::White)))
        }
        Winner::Black => {
            line.push_str(&format!("{:>name_width$} B+", by_color(Color::Black)))
        }
        Winner::Jigo => line.push_str(&format!("{JIGO:>name_width$}   ")),
        Winner::None => line.push_str(&format!("{RES_NONE:>name_width$}   ")),
    }
    let vio = result.time_violators.as_deref().unwrap_or(RES_NONE);
    line.push_str(&format!(
        "{:<6} {:3} {:3} {:3} {:11.6} {:9.6} {:9.6} {:11.6} {:9.6} {:9.6} VIO: {}",
        result.reason.code(),
        result.num_moves,
        first.moves,
        second.moves,
        first.total_time,
        first.average_time(),
        first.max_time,
        second.total_time,
        second.average_time(),
        second.max_time,
        vio
    ));
    line
}

fn now_iso() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let format =
        time::format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]")
            .expect("static format description");
    now.format(&format).unwrap_or_else(|_| "?".to_string())
}

/// Recover the next game number from an existing result log. The last
/// line's sequence number must agree with the line count; anything else
/// means the log was corrupted or hand-edited and resuming is refused.
pub fn next_game_number(path: &Path) -> Result<u32, Error> {
    if !path.exists() {
        return Ok(1);
    }
    let text = std::fs::read_to_string(path).map_err(Error::Io)?;
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let last = match lines.last() {
        Some(last) => last,
        None => return Ok(1),
    };
    let seq: u32 = last
        .strip_prefix('[')
        .and_then(|rest| rest.split(']').next())
        .and_then(|digits| digits.trim().parse().ok())
        .ok_or_else(|| {
            Error::Config(format!(
                "cannot resume: unparseable last line in {}",
                path.display()
            ))
        })?;
    if seq as usize != lines.len() {
        return Err(Error::Config(format!(
            "cannot resume: {} ends with game {seq} but holds {} lines",
            path.display(),
            lines.len()
        )));
    }
    Ok(seq + 1)
}

/// Append-mode handles for the two per-match logs.
pub struct GameLog {
    results: File,
    move_times: File,
    pub seq_width: usize,
    pub name_width: usize,
}

impl GameLog {
    pub fn open(dir: &Path, num_games: u32, names: [&str; 2]) -> Result<GameLog, Error> {
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
                .map_err(Error::Io)
        };
        Ok(GameLog {
            results: open("results.log")?,
            move_times: open("movetimes.log")?,
            seq_width: seq_width(num_games),
            name_width: name_width(names),
        })
    }

    pub fn result_path(dir: &Path) -> std::path::PathBuf {
        dir.join("results.log")
    }

    pub fn append_result(
        &mut self,
        seq: u32,
        first: &EngineLine,
        second: &EngineLine,
        result: &GameResult,
    ) -> Result<(), Error> {
        let line = format_result_line(
            seq,
            self.seq_width,
            self.name_width,
            &now_iso(),
            first,
            second,
            result,
        );
        writeln!(self.results, "{line}").map_err(Error::Io)?;
        self.results.flush().map_err(Error::Io)
    }

    pub fn append_move_times(&mut self, seq: u32, result: &GameResult) -> Result<(), Error> {
        let w = self.seq_width;
        for (i, (coord, secs)) in result.moves.iter().enumerate() {
            writeln!(
                self.move_times,
                "[{seq:0w$}] {:3} {coord:>5} {secs:9.6}",
                i + 1
            )
            .map_err(Error::Io)?;
        }
        self.move_times.flush().map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(winner: Winner, reason: GameOverReason) -> GameResult {
        GameResult {
            winner,
            reason,
            num_moves: 123,
            moves: vec![("D4".to_string(), 1.25), ("Q16".to_string(), 0.5)],
            time_violators: None,
        }
    }

    fn lines<'a>() -> (EngineLine<'a>, EngineLine<'a>) {
        (
            EngineLine {
                name: "alpha",
                color: Color::White,
                moves: 62,
                total_time: 30.5,
                max_time: 2.25,
            },
            EngineLine {
                name: "beta",
                color: Color::Black,
                moves: 61,
                total_time: 10.0,
                max_time: 0.5,
            },
        )
    }

    #[test]
    fn result_line_layout() {
        let (first, second) = lines();
        let result = sample_result(Winner::White, GameOverReason::Score("12.5".to_string()));
        let line = format_result_line(7, 3, 5, "2026-08-29T10:00:00", &first, &second, &result);
        assert!(line.starts_with(
            "[007] 2026-08-29T10:00:00 alpha W beta B = alpha W+12.5"
        ));
        assert!(line.contains(" 123  62  61 "));
        assert!(line.contains("   30.500000  0.491935  2.250000"));
        assert!(line.ends_with("VIO: None"));
    }

    #[test]
    fn winner_is_named_by_color() {
        let (first, second) = lines();
        let result = sample_result(Winner::Black, GameOverReason::Resign);
        let line = format_result_line(1, 1, 5, "2026-08-29T10:00:00", &first, &second, &result);
        assert!(line.contains("  beta B+Resign"), "line was: {line}");
    }

    #[test]
    fn jigo_and_no_result_have_no_winner_marker() {
        let (first, second) = lines();
        let result = sample_result(Winner::Jigo, GameOverReason::Jigo);
        let line = format_result_line(1, 1, 5, "2026-08-29T10:00:00", &first, &second, &result);
        assert!(line.contains(" Jigo   =="), "line was: {line}");

        let result = sample_result(Winner::None, GameOverReason::NoScorer);
        let line = format_result_line(1, 1, 5, "2026-08-29T10:00:00", &first, &second, &result);
        assert!(line.contains(" None   XX"), "line was: {line}");
    }

    #[test]
    fn violators_are_appended() {
        let (first, second) = lines();
        let mut result = sample_result(Winner::White, GameOverReason::Time);
        result.time_violators = Some("beta 17[6.100000]".to_string());
        let line = format_result_line(1, 1, 5, "2026-08-29T10:00:00", &first, &second, &result);
        assert!(line.ends_with("VIO: beta 17[6.100000]"));
    }

    #[test]
    fn resume_from_consistent_log() {
        let dir = std::env::temp_dir().join(format!("gtprun-record-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.log");

        std::fs::remove_file(&path).ok();
        assert_eq!(1, next_game_number(&path).unwrap());

        std::fs::write(&path, "[1] a W b B = ...\n[2] a B b W = ...\n").unwrap();
        assert_eq!(3, next_game_number(&path).unwrap());

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn resume_refuses_inconsistent_log() {
        let dir = std::env::temp_dir().join(format!("gtprun-record-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.log");

        std::fs::write(&path, "[1] a W b B = ...\n[5] a B b W = ...\n").unwrap();
        let err = next_game_number(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        std::fs::write(&path, "garbage\n").unwrap();
        let err = next_game_number(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_dir(&dir).ok();
    }
}
