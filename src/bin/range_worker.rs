//! Worker process for `processes` mode.
//!
//! Usage: `range_worker <job>`. The job context and tasks arrive on stdin as
//! JSON lines and responses go to stdout; logs go to stderr.

use std::io::{self, Write};
use std::process::ExitCode;

use geo_ranges::absence::MembershipJob;
use geo_ranges::alpha_hull::AlphaHullJob;
use geo_ranges::parallel::{serve_worker, Job};
use geo_ranges::ultrataxon::UltrataxonJob;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:5} worker {}] {}",
                record.level(),
                std::process::id(),
                record.args()
            )
        })
        .init();

    let Some(name) = std::env::args().nth(1) else {
        log::error!("missing job name");
        return ExitCode::from(2);
    };
    let (stdin, stdout) = (io::stdin(), io::stdout());
    let result = match name.as_str() {
        AlphaHullJob::NAME => serve_worker::<AlphaHullJob>(stdin.lock(), stdout.lock()),
        UltrataxonJob::NAME => serve_worker::<UltrataxonJob>(stdin.lock(), stdout.lock()),
        MembershipJob::NAME => serve_worker::<MembershipJob>(stdin.lock(), stdout.lock()),
        other => {
            log::error!("unknown job {other}");
            return ExitCode::from(2);
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{name}: {e}");
            ExitCode::FAILURE
        }
    }
}
