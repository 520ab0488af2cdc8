//! A single refereed game: the move relay loop, time accounting, pass
//! counting and final scoring.

use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::engine::GtpEngine;
use crate::error::{Error, GtpError};
use crate::gtp::{valid_move, Color};
use crate::timekeep::TimeKeep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    White,
    Black,
    Jigo,
    /// No winner could be determined.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameOverReason {
    Resign,
    Time,
    /// Won on the board by this margin.
    Score(String),
    Jigo,
    /// No scorer configured and the game ended in passes.
    NoScorer,
    /// The scorer failed or returned something unparseable.
    ScorerFault(String),
    /// An engine rejected its opponent's move.
    IllegalMove,
    /// A transport fault ended the game early.
    EngineError,
}

impl GameOverReason {
    /// Short code for the result log.
    pub fn code(&self) -> String {
        match *self {
            GameOverReason::Resign => "Resign".to_string(),
            GameOverReason::Time => "Time".to_string(),
            GameOverReason::Score(ref margin) => margin.clone(),
            GameOverReason::Jigo => "==".to_string(),
            GameOverReason::NoScorer => "XX".to_string(),
            GameOverReason::ScorerFault(_) => "SF".to_string(),
            GameOverReason::IllegalMove => "IL".to_string(),
            GameOverReason::EngineError => "EE".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct GameResult {
    pub winner: Winner,
    pub reason: GameOverReason,
    pub num_moves: u32,
    /// Every move in play order with the seconds it took.
    pub moves: Vec<(String, f64)>,
    /// Engines that overstepped, as `"name move[seconds]"`, comma joined.
    pub time_violators: Option<String>,
}

/// How a finished-by-passes game gets scored.
pub enum Scorer<'a> {
    /// Leave the result undetermined.
    None,
    /// Ask the white player in place.
    White,
    /// Ask the black player in place.
    Black,
    /// Replay the game into a third engine and ask it.
    External(&'a mut GtpEngine),
}

/// Referee one game. `white` and `black` must be started and set up;
/// colors, clocks and move counters are (re)assigned here.
pub fn play(
    white: &mut GtpEngine,
    black: &mut GtpEngine,
    scorer: Scorer,
    timekeep: &TimeKeep,
    move_wait: Duration,
    pass_threshold: u32,
) -> Result<GameResult, Error> {
    let board_size = timekeep.settings.board_size;
    for (engine, color) in [(&mut *white, Color::White), (&mut *black, Color::Black)] {
        engine.color = Some(color);
        timekeep.reset(&mut engine.clock);
        engine.moves_made = 0;
        if let Err(e @ Error::Gtp { .. }) = engine.clear_board() {
            warn!("{e}");
            engine.restart("clear_board fault", 1)?;
            engine.game_setup()?;
            engine.clear_board()?;
        }
    }

    let mut mover = &mut *black;
    let mut placer = &mut *white;
    let mut moves: Vec<(String, f64)> = Vec::new();
    let mut num_moves: u32 = 0;
    let mut consecutive_passes: u32 = 0;
    let mut violators: Vec<String> = Vec::new();

    loop {
        if !move_wait.is_zero() {
            thread::sleep(move_wait);
        }
        if timekeep.checking_time() {
            if let Err(e) = mover.send_time_left() {
                return fail_game(mover, e, num_moves, moves, violators);
            }
        }

        let asked_at = Instant::now();
        let coord = match mover.genmove() {
            Ok(coord) => coord,
            Err(e) => return fail_game(mover, e, num_moves, moves, violators),
        };
        let delta = asked_at.elapsed();
        mover.moves_made += 1;

        if !valid_move(&coord, board_size) {
            return Err(Error::Permanent {
                engine: mover.name.clone(),
                reason: format!("generated malformed move {coord:?}"),
            });
        }

        if timekeep.checkin(&mut mover.clock, delta) {
            violators.push(format!(
                "{} {}[{:.6}]",
                mover.name,
                num_moves + 1,
                delta.as_secs_f64()
            ));
            if timekeep.enforce_time {
                let winner = match placer.color.expect("color assigned above") {
                    Color::White => Winner::White,
                    Color::Black => Winner::Black,
                };
                return Ok(GameResult {
                    winner,
                    reason: GameOverReason::Time,
                    num_moves,
                    moves,
                    time_violators: join_violators(violators),
                });
            }
        }

        let lower = coord.to_ascii_lowercase();
        if lower == "resign" {
            let winner = match placer.color.expect("color assigned above") {
                Color::White => Winner::White,
                Color::Black => Winner::Black,
            };
            return Ok(GameResult {
                winner,
                reason: GameOverReason::Resign,
                num_moves,
                moves,
                time_violators: join_violators(violators),
            });
        }

        moves.push((coord.clone(), delta.as_secs_f64()));
        num_moves += 1;

        if lower == "pass" {
            consecutive_passes += 1;
        } else {
            consecutive_passes = 0;
        }
        if consecutive_passes >= pass_threshold {
            let (winner, reason) = score_game(mover, placer, scorer, &moves)?;
            return Ok(GameResult {
                winner,
                reason,
                num_moves,
                moves,
                time_violators: join_violators(violators),
            });
        }

        let mover_color = mover.color.expect("color assigned above");
        match placer.play(mover_color, &coord) {
            Ok(()) => {}
            Err(Error::Gtp {
                source: GtpError::IllegalMove,
                ..
            }) => {
                debug!("{} rejected {} by {}", placer.name, coord, mover.name);
                return Ok(GameResult {
                    winner: Winner::None,
                    reason: GameOverReason::IllegalMove,
                    num_moves,
                    moves,
                    time_violators: join_violators(violators),
                });
            }
            Err(e) => return fail_game(placer, e, num_moves, moves, violators),
        }

        mem::swap(&mut mover, &mut placer);
    }
}

/// Determine the winner of a game that ended in passes.
fn score_game(
    mover: &mut GtpEngine,
    placer: &mut GtpEngine,
    scorer: Scorer,
    moves: &[(String, f64)],
) -> Result<(Winner, GameOverReason), Error> {
    let asked = match scorer {
        Scorer::None => return Ok((Winner::None, GameOverReason::NoScorer)),
        Scorer::White | Scorer::Black => {
            let want = if matches!(scorer, Scorer::White) {
                Color::White
            } else {
                Color::Black
            };
            let engine = if mover.color == Some(want) { mover } else { placer };
            engine.final_score()
        }
        Scorer::External(engine) => replay_and_score(engine, moves),
    };
    match asked {
        Ok(text) => Ok(parse_score(&text)),
        Err(Error::Gtp { source, .. }) => {
            Ok((Winner::None, GameOverReason::ScorerFault(source.to_string())))
        }
        Err(e) => Err(e),
    }
}

/// Feed the whole game into a non-playing scorer engine, then ask it.
fn replay_and_score(engine: &mut GtpEngine, moves: &[(String, f64)]) -> Result<String, Error> {
    engine.clear_board()?;
    let mut color = Color::Black;
    for (coord, _) in moves {
        engine.play(color, coord)?;
        color = color.flip();
    }
    engine.final_score()
}

/// `final_score` responses look like `W+12.5`, `B+Resign` or `0` for jigo.
fn parse_score(text: &str) -> (Winner, GameOverReason) {
    let text = text.trim();
    if text == "0" {
        return (Winner::Jigo, GameOverReason::Jigo);
    }
    let mut parts = text.splitn(2, '+');
    let (color, margin) = (parts.next().unwrap_or(""), parts.next());
    match (color, margin) {
        ("W" | "w", Some(margin)) => (Winner::White, GameOverReason::Score(margin.to_string())),
        ("B" | "b", Some(margin)) => (Winner::Black, GameOverReason::Score(margin.to_string())),
        _ => (
            Winner::None,
            GameOverReason::ScorerFault(format!("unparseable score {text:?}")),
        ),
    }
}

/// A transport fault ends the game without a winner; the engine is
/// restarted so the match can continue. Anything else propagates.
fn fail_game(
    engine: &mut GtpEngine,
    err: Error,
    num_moves: u32,
    moves: Vec<(String, f64)>,
    violators: Vec<String>,
) -> Result<GameResult, Error> {
    match err {
        Error::Gtp { .. } => {
            warn!("{err}");
            engine.restart("mid-game fault", 1)?;
            engine.game_setup()?;
            Ok(GameResult {
                winner: Winner::None,
                reason: GameOverReason::EngineError,
                num_moves,
                moves,
                time_violators: join_violators(violators),
            })
        }
        e => Err(e),
    }
}

fn join_violators(violators: Vec<String>) -> Option<String> {
    if violators.is_empty() {
        None
    } else {
        Some(violators.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_parsed() {
        assert_eq!(
            (Winner::White, GameOverReason::Score("12.5".to_string())),
            parse_score("W+12.5")
        );
        assert_eq!(
            (Winner::Black, GameOverReason::Score("0.5".to_string())),
            parse_score("b+0.5\n")
        );
        assert_eq!((Winner::Jigo, GameOverReason::Jigo), parse_score("0"));

        let (winner, reason) = parse_score("something else");
        assert_eq!(Winner::None, winner);
        assert!(matches!(reason, GameOverReason::ScorerFault(_)));
    }

    #[test]
    fn reason_codes_for_the_result_log() {
        assert_eq!("Resign", GameOverReason::Resign.code());
        assert_eq!("Time", GameOverReason::Time.code());
        assert_eq!("12.5", GameOverReason::Score("12.5".to_string()).code());
        assert_eq!("==", GameOverReason::Jigo.code());
        assert_eq!("XX", GameOverReason::NoScorer.code());
        assert_eq!("SF", GameOverReason::ScorerFault("x".to_string()).code());
        assert_eq!("IL", GameOverReason::IllegalMove.code());
        assert_eq!("EE", GameOverReason::EngineError.code());
    }
}
