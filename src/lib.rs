pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod gtp;
pub mod logger;
pub mod match_runner;
pub mod record;
pub mod sgf;
pub mod stats;
pub mod timekeep;
