//! Engine process supervision: launch, handshake, restart budgeting and
//! guaranteed teardown of GTP subprocesses.

use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{split_command, EngineConfig, GameSettings, TimeSystem};
use crate::error::{Error, GtpError};
use crate::gtp::transport::{GtpTransport, StderrSink};
use crate::gtp::Color;
use crate::stats::EngineStats;
use crate::timekeep::ClockState;

/// Restart tokens an engine starts a match with.
const RESTART_CREDIT: i32 = 10;
/// Restarts this close together cost an extra two tokens.
const CRASH_LOOP_FAST: Duration = Duration::from_secs(20);
/// Restarts this close together cost an extra token.
const CRASH_LOOP_SLOW: Duration = Duration::from_secs(180);
/// Running this long without a restart restores the credit to half.
const CREDIT_HALF_AFTER: Duration = Duration::from_secs(600);
/// Running this long without a restart restores the credit in full.
const CREDIT_FULL_AFTER: Duration = Duration::from_secs(1800);
/// Grace given to `quit` before the process is killed.
const WAIT_QUIT: Duration = Duration::from_secs(5);
/// Deadline for handshake commands at startup.
const INITIAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player,
    Scorer,
}

/// GTP commands an engine must advertise in `list_commands` before it is
/// allowed to take part.
pub fn required_commands(role: Role, settings: &GameSettings, tolerance: f64) -> Vec<&'static str> {
    let mut cmds = vec!["boardsize", "clear_board", "komi", "play"];
    match role {
        Role::Player => cmds.push("genmove"),
        Role::Scorer => cmds.push("final_score"),
    }
    if !settings.untimed() {
        if settings.time_system == TimeSystem::Japanese {
            cmds.push("kgs-time_settings");
        } else {
            cmds.push("time_settings");
        }
        if role == Role::Player && tolerance >= 0.0 {
            cmds.push("time_left");
        }
    }
    cmds
}

/// Charge one restart against the credit budget. Tightly spaced restarts
/// cost more; long quiet stretches restore credit first.
pub(crate) fn debit_credit(credit: i32, severity: i32, since_last: Option<Duration>) -> i32 {
    let mut credit = credit;
    let mut severity = severity;
    if let Some(elapsed) = since_last {
        if elapsed >= CREDIT_FULL_AFTER {
            credit = RESTART_CREDIT;
        } else if elapsed >= CREDIT_HALF_AFTER {
            credit = credit.max(RESTART_CREDIT / 2);
        }
        if elapsed < CRASH_LOOP_FAST {
            severity += 2;
        } else if elapsed < CRASH_LOOP_SLOW {
            severity += 1;
        }
    }
    credit - severity
}

/// One supervised GTP subprocess together with its per-match bookkeeping.
pub struct GtpEngine {
    pub name: String,
    cmd: String,
    work_dir: Option<PathBuf>,
    required: Vec<&'static str>,
    settings: GameSettings,
    process: Option<Child>,
    transport: Option<GtpTransport>,
    stderr_sink: StderrSink,
    quit_sent: bool,
    credit: i32,
    last_restart: Option<Instant>,
    echo: bool,
    pub color: Option<Color>,
    pub clock: ClockState,
    pub moves_made: u32,
    pub stats: EngineStats,
}

impl GtpEngine {
    /// `cmd` must already have its placeholders expanded.
    pub fn new(config: &EngineConfig, cmd: String, role: Role, settings: &GameSettings, tolerance: f64, echo: bool) -> GtpEngine {
        GtpEngine {
            name: config.name.clone(),
            cmd,
            work_dir: config.work_dir.clone(),
            required: required_commands(role, settings, tolerance),
            settings: settings.clone(),
            process: None,
            transport: None,
            stderr_sink: Arc::new(Mutex::new(None)),
            quit_sent: false,
            credit: RESTART_CREDIT,
            last_restart: None,
            echo,
            color: None,
            clock: ClockState::default(),
            moves_made: 0,
            stats: EngineStats::default(),
        }
    }

    /// Extend the required command set, for a player that also scores.
    pub fn also_require(&mut self, cmd: &'static str) {
        if !self.required.contains(&cmd) {
            self.required.push(cmd);
        }
    }

    pub fn is_running(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| !t.is_down())
            .unwrap_or(false)
    }

    /// Swap the file the engine's stderr is forwarded to. The forwarding
    /// thread picks the new sink up on its next line.
    pub fn rotate_stderr(&self, file: Option<File>) {
        if let Ok(mut sink) = self.stderr_sink.lock() {
            *sink = file;
        }
    }

    /// Spawn the process and run the GTP handshake. Fails with
    /// `Error::Permanent` if the engine does not advertise every required
    /// command.
    pub fn start(&mut self) -> Result<(), Error> {
        let args = split_command(&self.cmd)?;
        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.work_dir {
            command.current_dir(dir);
        }
        let mut process = command
            .spawn()
            .map_err(|e| Error::gtp(&self.name, GtpError::Process(e)))?;

        let stdin = process.stdin.take().unwrap();
        let stdout = process.stdout.take().unwrap();
        let stderr = process.stderr.take().unwrap();

        let mut transport =
            GtpTransport::new(&self.name, stdin, stdout, stderr, self.stderr_sink.clone());
        transport.echo = self.echo;

        self.process = Some(process);
        self.transport = Some(transport);
        self.quit_sent = false;
        info!(engine = %self.name, "started: {}", self.cmd);

        // Identification failures are tolerated; they are diagnostics only.
        for cmd in ["protocol_version", "name", "version"] {
            match self.request(cmd, Some(INITIAL_TIMEOUT)) {
                Ok(text) => debug!(engine = %self.name, "{cmd}: {text}"),
                Err(Error::Gtp { ref source, .. })
                    if matches!(source, GtpError::UnknownCommand | GtpError::ResponseError(_)) =>
                {
                    warn!(engine = %self.name, "no response to {cmd}");
                }
                Err(e) => return Err(e),
            }
        }

        let listed = self.request("list_commands", Some(INITIAL_TIMEOUT))?;
        let known: HashSet<&str> = listed.split_whitespace().collect();
        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|cmd| !known.contains(cmd))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Permanent {
                engine: self.name.clone(),
                reason: format!("does not support: {}", missing.join(", ")),
            });
        }
        Ok(())
    }

    pub fn request(&mut self, command: &str, timeout: Option<Duration>) -> Result<String, Error> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::gtp(&self.name, GtpError::Shutdown))?;
        transport
            .request(command, timeout)
            .map_err(|source| Error::gtp(&self.name, source))
    }

    /// Configure board size, komi and the time system for a new game.
    pub fn game_setup(&mut self) -> Result<(), Error> {
        let s = self.settings.clone();
        self.request(&format!("boardsize {}", s.board_size), Some(INITIAL_TIMEOUT))?;
        self.request(&format!("komi {}", s.komi), Some(INITIAL_TIMEOUT))?;
        let time_cmd = match s.time_system {
            TimeSystem::Japanese => format!(
                "kgs-time_settings byoyomi {} {} {}",
                s.main_time, s.period_time, s.period_count
            ),
            TimeSystem::Canadian => {
                format!("time_settings {} {} {}", s.main_time, s.period_time, s.period_count)
            }
            TimeSystem::Absolute => format!("time_settings {} 0 {}", s.main_time, s.period_count),
            // No time system: GTP says infinite time is "0 periods".
            TimeSystem::None => format!("time_settings {} 1 0", s.main_time),
        };
        self.request(&time_cmd, Some(INITIAL_TIMEOUT))?;
        Ok(())
    }

    pub fn clear_board(&mut self) -> Result<(), Error> {
        self.request("clear_board", Some(INITIAL_TIMEOUT))?;
        Ok(())
    }

    /// Report the clock state to the engine with `time_left`.
    pub fn send_time_left(&mut self) -> Result<(), Error> {
        let color = self.color.expect("color assigned at game start");
        if let Some((time, stones)) = self.clock.gtp_time_left {
            self.request(&format!("time_left {color} {time} {stones}"), Some(INITIAL_TIMEOUT))?;
        }
        Ok(())
    }

    /// Ask for a move. The deadline comes from the engine's own clock.
    pub fn genmove(&mut self) -> Result<String, Error> {
        let color = self.color.expect("color assigned at game start");
        let timeout = self.clock.move_timeout;
        self.request(&format!("genmove {color}"), timeout)
    }

    pub fn play(&mut self, color: Color, coord: &str) -> Result<(), Error> {
        self.request(&format!("play {color} {coord}"), Some(INITIAL_TIMEOUT))?;
        Ok(())
    }

    pub fn final_score(&mut self) -> Result<String, Error> {
        self.request("final_score", Some(INITIAL_TIMEOUT))
    }

    /// Tear the process down: polite `quit`, then SIGKILL, then a reaping
    /// `wait`. Failure to confirm death is fatal for the whole run.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if let Some(mut transport) = self.transport.take() {
            if !self.quit_sent && !transport.is_down() {
                self.quit_sent = true;
                // Best effort; a wedged engine just gets killed below.
                if transport.send("quit").is_ok() {
                    let _ = transport.receive(Some(WAIT_QUIT));
                }
            }
            let process = self.process.as_mut().expect("transport implies process");
            if !wait_timeout(process, WAIT_QUIT)? {
                warn!(engine = %self.name, "did not quit, killing");
                process.kill().map_err(Error::Io)?;
                if !wait_timeout(process, WAIT_QUIT)? {
                    return Err(Error::Fatal(format!(
                        "engine {} survived SIGKILL; refusing to continue leaking processes",
                        self.name
                    )));
                }
            }
            transport.join();
        }
        self.process = None;
        Ok(())
    }

    /// Kill and relaunch after a fault, charging the restart budget.
    /// Exhausting the budget is a permanent fault.
    pub fn restart(&mut self, reason: &str, severity: i32) -> Result<(), Error> {
        let mut severity = severity;
        loop {
            let since_last = self.last_restart.map(|t| t.elapsed());
            self.credit = debit_credit(self.credit, severity, since_last);
            self.last_restart = Some(Instant::now());
            if self.credit < 0 {
                return Err(Error::Permanent {
                    engine: self.name.clone(),
                    reason: format!("restart credit exhausted ({reason})"),
                });
            }
            warn!(
                engine = %self.name,
                "restarting ({reason}), credit left: {}", self.credit
            );
            self.shutdown()?;
            match self.start() {
                Ok(()) => return Ok(()),
                // A failed restart attempt is itself a fault; go around
                // again until the credit runs out.
                Err(Error::Gtp { .. }) => severity = 1,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for GtpEngine {
    fn drop(&mut self) {
        // Safety net for error paths that skip shutdown().
        if let Some(ref mut process) = self.process {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Poll-based bounded wait; `Child::wait` has no timeout.
fn wait_timeout(process: &mut Child, timeout: Duration) -> Result<bool, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        match process.try_wait().map_err(Error::Io)? {
            Some(_) => return Ok(true),
            None if Instant::now() >= deadline => return Ok(false),
            None => thread::sleep(Duration::from_millis(50)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_commands_follow_role_and_clock() {
        let timed = GameSettings::default();
        let cmds = required_commands(Role::Player, &timed, 1.0);
        assert!(cmds.contains(&"genmove"));
        assert!(cmds.contains(&"time_settings"));
        assert!(cmds.contains(&"time_left"));
        assert!(!cmds.contains(&"final_score"));

        // Scorers never need time handling.
        let cmds = required_commands(Role::Scorer, &timed, 1.0);
        assert!(cmds.contains(&"final_score"));
        assert!(!cmds.contains(&"genmove"));
        assert!(!cmds.contains(&"time_left"));

        // Negative tolerance turns off time checking, so no time_left.
        let cmds = required_commands(Role::Player, &timed, -1.0);
        assert!(cmds.contains(&"time_settings"));
        assert!(!cmds.contains(&"time_left"));

        let japanese = GameSettings::new(19, 7.5, 0, 30, 5, TimeSystem::Japanese).unwrap();
        let cmds = required_commands(Role::Player, &japanese, 0.0);
        assert!(cmds.contains(&"kgs-time_settings"));
        assert!(!cmds.contains(&"time_settings"));

        let untimed = GameSettings::new(19, 7.5, 0, 0, 0, TimeSystem::None).unwrap();
        let cmds = required_commands(Role::Player, &untimed, 0.0);
        assert!(!cmds.iter().any(|c| c.contains("time")));
    }

    #[test]
    fn rapid_restarts_exhaust_credit() {
        let mut credit = RESTART_CREDIT;
        let mut restarts = 0;
        let mut last: Option<Duration> = None;
        while credit >= 0 {
            credit = debit_credit(credit, 1, last);
            last = Some(Duration::from_secs(5)); // crash loop pace
            restarts += 1;
            assert!(restarts < 100, "credit never ran out");
        }
        // First restart costs 1, each following one costs 3.
        assert_eq!(5, restarts);
    }

    #[test]
    fn spaced_restarts_never_exhaust_credit() {
        let mut credit = RESTART_CREDIT;
        for _ in 0..1000 {
            credit = debit_credit(credit, 1, Some(CREDIT_FULL_AFTER));
            assert!(credit >= 0);
        }
    }

    #[test]
    fn quiet_stretch_restores_half_credit() {
        let credit = debit_credit(0, 1, Some(CREDIT_HALF_AFTER));
        assert_eq!(RESTART_CREDIT / 2 - 1, credit);
    }
}
