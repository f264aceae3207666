//! Offline replay.
//!
//! Answers the request described by CGI environment variables from a
//! directory of recorded exchanges. The response goes to stdout; logs and
//! diagnostics go to stderr. Exits 1 when nothing matches.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use replay_proxy::archive::RecordStore;
use replay_proxy::config::{load_or_default, ObservabilityConfig, ProxyConfig};
use replay_proxy::matching::MatchPolicy;
use replay_proxy::observability::logging;
use replay_proxy::replay::{self, RequestContext};

fn answer(config: ProxyConfig) -> Result<(), Box<dyn Error>> {
    let dir = std::env::var("REPLAY_ARCHIVE_DIR").unwrap_or(config.replay.archive_dir);
    let context = RequestContext::from_env()?;
    let store = RecordStore::new(dir);
    let policy = MatchPolicy::Fuzzy(config.replay.match_headers);

    let outcome = replay::run(&context, &store, &policy)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&outcome.response_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let config_path = std::env::var_os("REPLAY_PROXY_CONFIG").map(PathBuf::from);
    let config = load_or_default(config_path.as_deref());

    let filter = match &config {
        Ok(config) => config.observability.log_level.clone(),
        Err(_) => ObservabilityConfig::default().log_level,
    };
    logging::init_stderr(&filter);

    let result = match config {
        Ok(config) => answer(config),
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // not a log event: the diagnostic must survive any log filter
            eprintln!("replay-server: {e}");
            ExitCode::FAILURE
        }
    }
}
