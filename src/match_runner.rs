//! Runs one configured match end to end: acquires the match directory and
//! logs, starts the engines, alternates colors over N games and aggregates
//! statistics.

use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::path::PathBuf;
use std::thread;

use indicatif::{ProgressBar, ProgressDrawTarget};
use tracing::info;

use crate::config::{expand_template, DisplayMode, MatchConfig};
use crate::engine::{GtpEngine, Role};
use crate::error::Error;
use crate::game::{self, Scorer};
use crate::record::{self, EngineLine, GameLog};
use crate::sgf::SgfGame;
use crate::stats::EngineStats;
use crate::timekeep::TimeKeep;

#[derive(Debug)]
pub struct MatchSummary {
    pub name: String,
    pub engines: Vec<(String, EngineStats)>,
}

/// Run one match. Aborting faults blacklist the offending engine so later
/// matches referencing it fail fast instead of re-triggering the fault.
pub fn run_match(
    config: &MatchConfig,
    resume: bool,
    display: DisplayMode,
    blacklist: &mut HashSet<String>,
) -> Result<MatchSummary, Error> {
    for engine in config.players.iter().chain(config.scorer.as_ref()) {
        if blacklist.contains(&engine.name) {
            return Err(Error::Permanent {
                engine: engine.name.clone(),
                reason: "blacklisted earlier in this run".to_string(),
            });
        }
    }
    let result = run(config, resume, display);
    if let Err(Error::Permanent { ref engine, .. }) = result {
        blacklist.insert(engine.clone());
    }
    result
}

fn run(config: &MatchConfig, resume: bool, display: DisplayMode) -> Result<MatchSummary, Error> {
    let (match_dir, first_game) = acquire_match_dir(config, resume)?;
    if first_game > config.num_games {
        info!(match_name = %config.name, "already complete, nothing to resume");
        return Ok(MatchSummary {
            name: config.name.clone(),
            engines: config
                .players
                .iter()
                .map(|p| (p.name.clone(), EngineStats::default()))
                .collect(),
        });
    }

    let stderr_dir = match_dir.join("stderr");
    fs::create_dir_all(&stderr_dir).map_err(Error::Io)?;
    let sgf_dir = match_dir.join("sgfs");
    if config.sgf {
        fs::create_dir_all(&sgf_dir).map_err(Error::Io)?;
    }

    let timekeep = TimeKeep::new(&config.settings, config.time_tolerance, config.enforce_time);
    let echo = display == DisplayMode::Gtp;
    // Templates get the absolute path so engines with their own work_dir
    // can still find the match directory.
    let match_dir_str = fs::canonicalize(&match_dir)
        .unwrap_or_else(|_| match_dir.clone())
        .to_string_lossy()
        .to_string();

    let build = |cfg: &crate::config::EngineConfig, role: Role| {
        let cmd = expand_template(&cfg.cmd, &cfg.name, &match_dir_str, &config.settings);
        GtpEngine::new(cfg, cmd, role, &config.settings, config.time_tolerance, echo)
    };

    let mut first = build(&config.players[0], Role::Player);
    let mut second = build(&config.players[1], Role::Player);
    // A scorer that is one of the players scores in place; a third engine
    // gets its own process and replays finished games.
    let mut external_scorer: Option<GtpEngine> = None;
    let mut scorer_player: Option<String> = None;
    if let Some(ref scorer) = config.scorer {
        if scorer.name == first.name || scorer.name == second.name {
            let player = if scorer.name == first.name {
                &mut first
            } else {
                &mut second
            };
            player.also_require("final_score");
            scorer_player = Some(scorer.name.clone());
        } else {
            external_scorer = Some(build(scorer, Role::Scorer));
        }
    }

    if !config.initial_wait.is_zero() {
        thread::sleep(config.initial_wait);
    }

    for engine in [&mut first, &mut second]
        .into_iter()
        .chain(external_scorer.as_mut())
    {
        match engine.start() {
            Ok(()) => {}
            Err(e @ Error::Gtp { .. }) => {
                tracing::warn!("{e}");
                engine.restart("startup fault", 2)?;
            }
            Err(e) => return Err(e),
        }
        match engine.game_setup() {
            Ok(()) => {}
            Err(e @ Error::Gtp { .. }) => {
                tracing::warn!("{e}");
                engine.restart("setup fault", 1)?;
                engine.game_setup()?;
            }
            Err(e) => return Err(e),
        }
    }

    let mut log = GameLog::open(
        &match_dir,
        config.num_games,
        [first.name.as_str(), second.name.as_str()],
    )?;
    let seq_width = log.seq_width;

    let bar = if display == DisplayMode::Dots {
        ProgressBar::with_draw_target(Some(config.num_games as u64), ProgressDrawTarget::stderr())
    } else {
        ProgressBar::hidden()
    };
    bar.set_position((first_game - 1) as u64);

    let mut play_games = || -> Result<(), Error> {
        for game_no in first_game..=config.num_games {
            // Odd games: the first configured engine plays White.
            let first_is_white = game_no % 2 == 1;
            let (white, black) = if first_is_white {
                (&mut first, &mut second)
            } else {
                (&mut second, &mut first)
            };

            for engine in [&mut *white, &mut *black]
                .into_iter()
                .chain(external_scorer.as_mut())
            {
                let path = stderr_dir.join(format!("{}-{game_no:0seq_width$}.log", engine.name));
                engine.rotate_stderr(Some(File::create(path).map_err(Error::Io)?));
            }

            let scorer = match (&scorer_player, external_scorer.as_mut()) {
                (Some(name), _) if *name == white.name => Scorer::White,
                (Some(name), _) if *name == black.name => Scorer::Black,
                (None, Some(engine)) => Scorer::External(engine),
                _ => Scorer::None,
            };

            let white_name = white.name.clone();
            let black_name = black.name.clone();
            let result = game::play(
                white,
                black,
                scorer,
                &timekeep,
                config.move_wait,
                config.consecutive_passes,
            )?;

            for engine in [&mut first, &mut second] {
                engine.stats.record_game(
                    engine.color.expect("color assigned during play"),
                    &result.winner,
                    engine.moves_made,
                    engine.clock.total_taken,
                    engine.clock.max_taken,
                );
            }

            let first_line = engine_line(&first);
            let second_line = engine_line(&second);
            log.append_result(game_no, &first_line, &second_line, &result)?;
            log.append_move_times(game_no, &result)?;

            if config.sgf {
                let mut sgf = SgfGame::new(
                    &config.settings,
                    &white_name,
                    &black_name,
                    &format!("game {game_no}"),
                    &format!("{} {}-game match", config.name, config.num_games),
                );
                for (coord, _) in &result.moves {
                    sgf.add_move(coord);
                }
                sgf.set_result(&result);
                sgf.write(&sgf_dir)?;
            }

            bar.inc(1);
            if !config.game_wait.is_zero() && game_no < config.num_games {
                thread::sleep(config.game_wait);
            }
        }
        Ok(())
    };
    let outcome = play_games();
    bar.finish_and_clear();

    // Engines are torn down whether the match finished or aborted; the
    // first shutdown failure outranks everything but a match fault.
    let mut shutdown_err = None;
    for engine in [&mut first, &mut second]
        .into_iter()
        .chain(external_scorer.as_mut())
    {
        if let Err(e) = engine.shutdown() {
            tracing::error!("{e}");
            shutdown_err.get_or_insert(e);
        }
    }
    outcome?;
    if let Some(e) = shutdown_err {
        return Err(e);
    }

    Ok(MatchSummary {
        name: config.name.clone(),
        engines: vec![
            (first.name.clone(), first.stats.clone()),
            (second.name.clone(), second.stats.clone()),
        ],
    })
}

fn engine_line(engine: &GtpEngine) -> EngineLine<'_> {
    EngineLine {
        name: &engine.name,
        color: engine.color.expect("color assigned during play"),
        moves: engine.moves_made,
        total_time: engine.clock.total_taken.as_secs_f64(),
        max_time: engine.clock.max_taken.as_secs_f64(),
    }
}

/// Create or reopen the match directory. Without `--continue` an existing
/// directory is left alone and a `-NNN` suffixed sibling is used instead.
fn acquire_match_dir(config: &MatchConfig, resume: bool) -> Result<(PathBuf, u32), Error> {
    let base = PathBuf::from(config.name.replace(' ', "_"));
    if base.exists() {
        if resume {
            let next = record::next_game_number(&GameLog::result_path(&base))?;
            return Ok((base, next));
        }
        for i in 1..=999 {
            let sibling = PathBuf::from(format!("{}-{i:03}", base.display()));
            if !sibling.exists() {
                fs::create_dir_all(&sibling).map_err(Error::Io)?;
                return Ok((sibling, 1));
            }
        }
        return Err(Error::Config(format!(
            "cannot find a free directory name for match {:?}",
            config.name
        )));
    }
    fs::create_dir_all(&base).map_err(Error::Io)?;
    Ok((base, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;

    const CONFIG: &str = r#"
num_games = 2

[engines.a]
cmd = "engine-a"

[engines.b]
cmd = "engine-b"

[[matches]]
name = "smoke"
engines = ["a", "b"]
"#;

    #[test]
    fn blacklisted_engines_abort_before_start() {
        let run = RunConfig::parse(CONFIG).unwrap();
        let mut blacklist = HashSet::new();
        blacklist.insert("b".to_string());
        let err = run_match(&run.matches[0], false, DisplayMode::Quiet, &mut blacklist)
            .unwrap_err();
        assert!(matches!(err, Error::Permanent { ref engine, .. } if engine == "b"));
    }
}
