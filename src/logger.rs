use std::fs::File;

use time::{format_description, OffsetDateTime};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter, FmtSubscriber};

/// Set up the run log: a timestamped file in the working directory, level
/// overridable through `RUST_LOG`. Panics on error; there is no point
/// starting engines without a log to attribute their faults to.
pub fn init() {
    let file_name = log_file_name();
    let file = File::create(&file_name)
        .unwrap_or_else(|e| panic!("cannot create run log {file_name}: {e}"));
    let writer = BoxMakeWriter::new(file);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC),
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .expect("static format description"),
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();
    set_global_default(subscriber).expect("a global tracing subscriber is already set");
}

fn log_file_name() -> String {
    let format = format_description::parse("gtprun_[year][month][day]-[hour][minute][second].log")
        .expect("static format description");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format)
        .unwrap_or_else(|_| "gtprun.log".to_string())
}
