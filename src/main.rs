use std::cmp;
use std::collections::HashSet;
use std::process;
use std::thread;

use clap::{crate_version, Arg, ArgAction, Command};
use console::style;

use gtp_run::config::{DisplayMode, RunConfig};
use gtp_run::logger;
use gtp_run::match_runner::{run_match, MatchSummary};
use gtp_run::stats::EngineStats;

/// Minimum exit code when anything aborted.
const ABORT_FLOOR: i32 = 1;

fn main() {
    let matches = Command::new("gtprun")
        .version(crate_version!())
        .about("A command line utility for running matches between GTP compliant Go engines.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("TOML")
                .help("Loads a configuration file with engines and match rules")
                .required(true),
        )
        .arg(
            Arg::new("continue")
                .long("continue")
                .action(ArgAction::SetTrue)
                .help("Resumes interrupted matches from their result logs"),
        )
        .arg(
            Arg::new("display")
                .short('d')
                .long("display")
                .value_name("MODE")
                .value_parser(["quiet", "dots", "gtp"])
                .help("Progress output: nothing, a progress bar, or raw GTP traffic"),
        )
        .get_matches();

    logger::init();

    let config_path = matches.get_one::<String>("config").expect("required arg");
    let mut run = match RunConfig::load(config_path) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("{e}");
            process::exit(ABORT_FLOOR);
        }
    };
    if let Some(display) = matches.get_one::<String>("display") {
        run.display = match display.as_str() {
            "quiet" => DisplayMode::Quiet,
            "gtp" => DisplayMode::Gtp,
            _ => DisplayMode::Dots,
        };
    }
    let resume = matches.get_flag("continue");

    let mut blacklist = HashSet::new();
    let mut aborted: i32 = 0;
    for (i, match_config) in run.matches.iter().enumerate() {
        if i > 0 && !run.match_wait.is_zero() {
            thread::sleep(run.match_wait);
        }
        match run_match(match_config, resume, run.display, &mut blacklist) {
            Ok(ref summary) => print_summary(summary),
            Err(ref e) if e.is_fatal() => {
                eprintln!("{e}");
                process::exit(cmp::max(ABORT_FLOOR, aborted + 1));
            }
            Err(e) => {
                aborted += 1;
                eprintln!(
                    "{} {e}",
                    style(format!("match {:?} aborted:", match_config.name)).red()
                );
            }
        }
    }
    if aborted > 0 {
        process::exit(cmp::max(ABORT_FLOOR, aborted));
    }
}

fn print_summary(summary: &MatchSummary) {
    println!();
    println!("{}", style(format!("Match {}", summary.name)).bold());
    for (name, stats) in &summary.engines {
        println!(
            "{name}: {} ({:.2}%)  as W {}/{}  as B {}/{}  avg {:.3}s  max {:.3}s",
            win_summary(stats),
            stats.win_rate() * 100.0,
            stats.wins_as_white(),
            stats.games_as_white(),
            stats.wins_as_black(),
            stats.games_as_black(),
            stats.average_time_per_move(),
            stats.max_time_per_move(),
        );
    }
}

fn win_summary(stats: &EngineStats) -> String {
    format!("{}/{}", stats.wins(), stats.total_games())
}
