use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use toml::Value;

use crate::error::Error;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DisplayMode {
    /// No progress output.
    Quiet,
    /// Progress bar, one tick per game.
    Dots,
    /// Raw GTP traffic echoed to stderr.
    Gtp,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TimeSystem {
    None,
    Absolute,
    Canadian,
    Japanese,
}

impl TimeSystem {
    fn parse(name: &str) -> Result<TimeSystem, Error> {
        match name {
            "none" => Ok(TimeSystem::None),
            "absolute" => Ok(TimeSystem::Absolute),
            "canadian" => Ok(TimeSystem::Canadian),
            "japanese" => Ok(TimeSystem::Japanese),
            _ => Err(Error::Config(format!(
                "unknown time system {name:?} (expected none, absolute, canadian or japanese)"
            ))),
        }
    }
}

/// Immutable per-match game parameters, validated at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSettings {
    pub board_size: u32,
    pub komi: f32,
    /// Main time in seconds.
    pub main_time: u32,
    /// Period time in seconds.
    pub period_time: u32,
    /// Periods (Japanese) or stones per period (Canadian).
    pub period_count: u32,
    pub time_system: TimeSystem,
}

impl GameSettings {
    pub fn new(
        board_size: u32,
        komi: f32,
        main_time: u32,
        period_time: u32,
        period_count: u32,
        time_system: TimeSystem,
    ) -> Result<GameSettings, Error> {
        if !(2..=25).contains(&board_size) {
            return Err(Error::Config(format!(
                "board size {board_size} out of range (2-25)"
            )));
        }
        if matches!(time_system, TimeSystem::Canadian | TimeSystem::Japanese) {
            if period_time == 0 {
                return Err(Error::Config(
                    "period time must be positive for byo-yomi time systems".to_string(),
                ));
            }
            if period_count == 0 {
                return Err(Error::Config(
                    "period count must be positive for byo-yomi time systems".to_string(),
                ));
            }
        }
        Ok(GameSettings {
            board_size,
            komi,
            main_time,
            period_time,
            period_count,
            time_system,
        })
    }

    pub fn untimed(&self) -> bool {
        self.time_system == TimeSystem::None
    }
}

impl Default for GameSettings {
    fn default() -> GameSettings {
        GameSettings {
            board_size: 19,
            komi: 7.5,
            main_time: 0,
            period_time: 5,
            period_count: 1,
            time_system: TimeSystem::Canadian,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct EngineConfig {
    pub name: String,
    /// Launch command; supports `{name}`, `{matchdir}`, `{boardsize}`,
    /// `{komi}`, `{maintime}`, `{periodtime}` and `{periodcount}`.
    pub cmd: String,
    pub work_dir: Option<PathBuf>,
}

impl EngineConfig {
    fn from_value(name: &str, value: &Value) -> Result<EngineConfig, Error> {
        if name.split_whitespace().count() != 1 {
            return Err(Error::Config(format!(
                "engine name {name:?} must not contain whitespace"
            )));
        }
        let cmd = value
            .get("cmd")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config(format!("engine {name:?} has no cmd")))?
            .to_string();
        let work_dir = value
            .get("work_dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        Ok(EngineConfig {
            name: name.to_string(),
            cmd,
            work_dir,
        })
    }
}

/// One configured match: two players, an optional scorer and the rules.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub name: String,
    pub players: [EngineConfig; 2],
    /// May name one of the players (scores in place) or a third engine
    /// (replays the game before scoring). `None` disables scoring.
    pub scorer: Option<EngineConfig>,
    pub settings: GameSettings,
    pub num_games: u32,
    pub consecutive_passes: u32,
    /// Seconds; negative disables time checking entirely.
    pub time_tolerance: f64,
    pub enforce_time: bool,
    pub sgf: bool,
    pub initial_wait: Duration,
    pub move_wait: Duration,
    pub game_wait: Duration,
}

#[derive(Debug, Clone)]
struct MatchDefaults {
    num_games: u32,
    board_size: u32,
    komi: f32,
    main_time: u32,
    period_time: u32,
    period_count: u32,
    time_system: String,
    consecutive_passes: u32,
    time_tolerance: f64,
    enforce_time: bool,
    sgf: bool,
    initial_wait: f64,
    move_wait: f64,
    game_wait: f64,
    scorer: Option<String>,
}

impl Default for MatchDefaults {
    fn default() -> MatchDefaults {
        MatchDefaults {
            num_games: 100,
            board_size: 19,
            komi: 7.5,
            main_time: 0,
            period_time: 5,
            period_count: 1,
            time_system: "canadian".to_string(),
            consecutive_passes: 2,
            time_tolerance: 0.0,
            enforce_time: false,
            sgf: false,
            initial_wait: 0.5,
            move_wait: 0.0,
            game_wait: 0.0,
            scorer: None,
        }
    }
}

fn float_of(value: &Value, key: &str) -> Option<f64> {
    value
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
}

impl MatchDefaults {
    fn merge(&mut self, value: &Value) {
        if let Some(v) = value.get("num_games").and_then(|v| v.as_integer()) {
            self.num_games = v as u32;
        }
        if let Some(v) = value.get("board_size").and_then(|v| v.as_integer()) {
            self.board_size = v as u32;
        }
        if let Some(v) = float_of(value, "komi") {
            self.komi = v as f32;
        }
        if let Some(v) = value.get("main_time").and_then(|v| v.as_integer()) {
            self.main_time = v as u32;
        }
        if let Some(v) = value.get("period_time").and_then(|v| v.as_integer()) {
            self.period_time = v as u32;
        }
        if let Some(v) = value.get("period_count").and_then(|v| v.as_integer()) {
            self.period_count = v as u32;
        }
        if let Some(v) = value.get("time_system").and_then(|v| v.as_str()) {
            self.time_system = v.to_string();
        }
        if let Some(v) = value.get("consecutive_passes").and_then(|v| v.as_integer()) {
            self.consecutive_passes = v as u32;
        }
        if let Some(v) = float_of(value, "time_tolerance") {
            self.time_tolerance = v;
        }
        if let Some(v) = value.get("enforce_time").and_then(|v| v.as_bool()) {
            self.enforce_time = v;
        }
        if let Some(v) = value.get("sgf").and_then(|v| v.as_bool()) {
            self.sgf = v;
        }
        if let Some(v) = float_of(value, "initial_wait") {
            self.initial_wait = v;
        }
        if let Some(v) = float_of(value, "move_wait") {
            self.move_wait = v;
        }
        if let Some(v) = float_of(value, "game_wait") {
            self.game_wait = v;
        }
        if let Some(v) = value.get("scorer").and_then(|v| v.as_str()) {
            self.scorer = Some(v.to_string());
        }
    }

    fn build(
        &self,
        name: &str,
        engine_names: &[String],
        engines: &BTreeMap<String, EngineConfig>,
    ) -> Result<MatchConfig, Error> {
        if engine_names.len() != 2 {
            return Err(Error::Config(format!(
                "match {name:?} must list exactly two engines"
            )));
        }
        let lookup = |engine: &str| -> Result<EngineConfig, Error> {
            engines.get(engine).cloned().ok_or_else(|| {
                Error::Config(format!(
                    "match {name:?} references unknown engine {engine:?}"
                ))
            })
        };
        let players = [lookup(&engine_names[0])?, lookup(&engine_names[1])?];
        if players[0].name == players[1].name {
            return Err(Error::Config(format!(
                "match {name:?} pairs engine {:?} against itself",
                players[0].name
            )));
        }
        let scorer = match self.scorer {
            Some(ref scorer) => Some(lookup(scorer)?),
            None => None,
        };
        let settings = GameSettings::new(
            self.board_size,
            self.komi,
            self.main_time,
            self.period_time,
            self.period_count,
            TimeSystem::parse(&self.time_system)?,
        )?;
        Ok(MatchConfig {
            name: name.to_string(),
            players,
            scorer,
            settings,
            num_games: self.num_games,
            consecutive_passes: self.consecutive_passes.max(1),
            time_tolerance: self.time_tolerance,
            enforce_time: self.enforce_time,
            sgf: self.sgf,
            initial_wait: Duration::from_secs_f64(self.initial_wait.max(0.0)),
            move_wait: Duration::from_secs_f64(self.move_wait.max(0.0)),
            game_wait: Duration::from_secs_f64(self.game_wait.max(0.0)),
        })
    }
}

#[derive(Debug)]
pub struct RunConfig {
    pub matches: Vec<MatchConfig>,
    pub match_wait: Duration,
    pub display: DisplayMode,
}

impl RunConfig {
    pub fn load(config_path: &str) -> Result<RunConfig, Error> {
        let mut buf = String::new();
        File::open(config_path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| Error::Config(format!("cannot read {config_path}: {e}")))?;
        Self::parse(&buf)
    }

    pub fn parse(text: &str) -> Result<RunConfig, Error> {
        let value = text
            .parse::<Value>()
            .map_err(|e| Error::Config(e.to_string()))?;

        let mut engines = BTreeMap::new();
        if let Some(table) = value.get("engines").and_then(|v| v.as_table()) {
            for (name, engine) in table.iter() {
                engines.insert(name.to_string(), EngineConfig::from_value(name, engine)?);
            }
        }

        let mut defaults = MatchDefaults::default();
        defaults.merge(&value);

        let mut matches = Vec::new();
        if let Some(sections) = value.get("matches").and_then(|v| v.as_array()) {
            for section in sections {
                let mut merged = defaults.clone();
                merged.merge(section);
                let engine_names: Vec<String> = section
                    .get("engines")
                    .and_then(|v| v.as_array())
                    .map(|v| {
                        v.iter()
                            .filter_map(|e| e.as_str())
                            .map(|e| e.to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                let name = match section.get("name").and_then(|v| v.as_str()) {
                    Some(name) => name.to_string(),
                    None => engine_names.join("-vs-"),
                };
                matches.push(merged.build(&name, &engine_names, &engines)?);
            }
        }
        if matches.is_empty() {
            return Err(Error::Config("no [[matches]] sections".to_string()));
        }

        let match_wait = float_of(&value, "match_wait").unwrap_or(0.0);

        Ok(RunConfig {
            matches,
            match_wait: Duration::from_secs_f64(match_wait.max(0.0)),
            display: DisplayMode::Dots,
        })
    }
}

/// Split a command line into arguments, honoring single and double quotes.
pub fn split_command(cmd: &str) -> Result<Vec<String>, Error> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    for c in cmd.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_arg = true;
                }
                c if c.is_whitespace() => {
                    if in_arg {
                        args.push(std::mem::take(&mut current));
                        in_arg = false;
                    }
                }
                c => {
                    current.push(c);
                    in_arg = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(Error::Config(format!(
            "unbalanced quote in command {cmd:?}"
        )));
    }
    if in_arg {
        args.push(current);
    }
    if args.is_empty() {
        return Err(Error::Config("empty engine command".to_string()));
    }
    Ok(args)
}

/// Expand the launch-command template variables for one engine.
pub fn expand_template(
    cmd: &str,
    engine_name: &str,
    match_dir: &str,
    settings: &GameSettings,
) -> String {
    cmd.replace("{name}", engine_name)
        .replace("{matchdir}", match_dir)
        .replace("{boardsize}", &settings.board_size.to_string())
        .replace("{komi}", &settings.komi.to_string())
        .replace("{maintime}", &settings.main_time.to_string())
        .replace("{periodtime}", &settings.period_time.to_string())
        .replace("{periodcount}", &settings.period_count.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
num_games = 4
board_size = 9
time_system = "japanese"
main_time = 60
period_time = 10
period_count = 3
sgf = true
scorer = "alpha"

[engines.alpha]
cmd = "alpha-engine --gtp"

[engines.beta]
cmd = "beta-engine --mode gtp"
work_dir = "/tmp"

[[matches]]
name = "alpha-beta"
engines = ["alpha", "beta"]

[[matches]]
engines = ["beta", "alpha"]
num_games = 2
time_system = "none"
"#;

    #[test]
    fn parses_matches_with_defaults() {
        let config = RunConfig::parse(SAMPLE).expect("config should parse");
        assert_eq!(2, config.matches.len());

        let first = &config.matches[0];
        assert_eq!("alpha-beta", first.name);
        assert_eq!(4, first.num_games);
        assert_eq!(9, first.settings.board_size);
        assert_eq!(TimeSystem::Japanese, first.settings.time_system);
        assert_eq!("alpha", first.players[0].name);
        assert_eq!(Some("alpha"), first.scorer.as_ref().map(|s| s.name.as_str()));
        assert!(first.sgf);

        let second = &config.matches[1];
        assert_eq!("beta-vs-alpha", second.name);
        assert_eq!(2, second.num_games);
        assert_eq!(TimeSystem::None, second.settings.time_system);
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(RunConfig::parse("").is_err());
        assert!(RunConfig::parse("[[matches]]\nengines = [\"x\", \"y\"]").is_err());
        assert!(GameSettings::new(1, 7.5, 0, 5, 1, TimeSystem::Canadian).is_err());
        assert!(GameSettings::new(26, 7.5, 0, 5, 1, TimeSystem::Canadian).is_err());
        assert!(GameSettings::new(19, 7.5, 0, 0, 1, TimeSystem::Japanese).is_err());
        assert!(GameSettings::new(19, 7.5, 0, 5, 0, TimeSystem::Canadian).is_err());
        assert!(GameSettings::new(19, 7.5, 0, 0, 0, TimeSystem::None).is_ok());
    }

    #[test]
    fn splits_quoted_commands() {
        let args = split_command("/bin/sh -c 'echo = ; echo'").expect("should split");
        assert_eq!(vec!["/bin/sh", "-c", "echo = ; echo"], args);
        let args = split_command("engine --name \"deep bot\"").expect("should split");
        assert_eq!(vec!["engine", "--name", "deep bot"], args);
        assert!(split_command("engine 'unbalanced").is_err());
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn expands_templates() {
        let settings = GameSettings::default();
        let cmd = expand_template(
            "engine --board {boardsize} --komi {komi} --log {matchdir}/{name}.log",
            "alpha",
            "/tmp/m1",
            &settings,
        );
        assert_eq!("engine --board 19 --komi 7.5 --log /tmp/m1/alpha.log", cmd);
    }
}
