use std::time::Duration;

use crate::game::Winner;
use crate::gtp::Color;

/// Cumulative per-engine results and timing over a whole match.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    wins: u32,
    total_games: u32,
    wins_as_black: u32,
    games_as_black: u32,
    wins_as_white: u32,
    games_as_white: u32,
    total_time: f64,
    max_time_per_move: f64,
    total_moves: u32,
}

impl EngineStats {
    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn total_games(&self) -> u32 {
        self.total_games
    }

    pub fn wins_as_black(&self) -> u32 {
        self.wins_as_black
    }

    pub fn games_as_black(&self) -> u32 {
        self.games_as_black
    }

    pub fn wins_as_white(&self) -> u32 {
        self.wins_as_white
    }

    pub fn games_as_white(&self) -> u32 {
        self.games_as_white
    }

    pub fn total_moves(&self) -> u32 {
        self.total_moves
    }

    pub fn max_time_per_move(&self) -> f64 {
        self.max_time_per_move
    }

    pub fn average_time_per_move(&self) -> f64 {
        if self.total_moves == 0 {
            0.0
        } else {
            self.total_time / self.total_moves as f64
        }
    }

    pub fn win_rate(&self) -> f32 {
        if self.total_games == 0 {
            0.0
        } else {
            self.wins as f32 / self.total_games as f32
        }
    }

    pub fn record_game(
        &mut self,
        color: Color,
        winner: &Winner,
        moves: u32,
        total_time: Duration,
        max_time: Duration,
    ) {
        let won = match winner {
            Winner::Black => color == Color::Black,
            Winner::White => color == Color::White,
            Winner::Jigo | Winner::None => false,
        };
        if won {
            self.wins += 1;
        }
        match color {
            Color::Black => {
                self.games_as_black += 1;
                if won {
                    self.wins_as_black += 1;
                }
            }
            Color::White => {
                self.games_as_white += 1;
                if won {
                    self.wins_as_white += 1;
                }
            }
        }
        self.total_games += 1;
        self.total_moves += moves;
        self.total_time += total_time.as_secs_f64();
        let max_time = max_time.as_secs_f64();
        if max_time > self.max_time_per_move {
            self.max_time_per_move = max_time;
        }
    }
}
