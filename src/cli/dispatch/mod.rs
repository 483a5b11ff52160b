use crate::auth::AuthConfig;
use crate::cli::actions::Action;
use anyhow::Result;
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let mut config = AuthConfig::new();
    if let Some(&failures) = matches.get_one::<u32>("max-failures") {
        config = config.with_max_failures(failures);
    }
    if let Some(&seconds) = matches.get_one::<i64>("lockout-base-secs") {
        config = config.with_lockout_base_seconds(seconds);
    }
    if let Some(&seconds) = matches.get_one::<i64>("lockout-cap-secs") {
        config = config.with_lockout_cap_seconds(seconds);
    }
    if let Some(&seconds) = matches.get_one::<i64>("idle-ttl-secs") {
        config = config.with_idle_ttl_seconds(seconds);
    }
    if let Some(&seconds) = matches.get_one::<i64>("absolute-ttl-secs") {
        config = config.with_absolute_ttl_seconds(seconds);
    }
    if let Some(&attempts) = matches.get_one::<u32>("rate-limit-device") {
        config = config.with_device_attempts(attempts);
    }
    if let Some(&attempts) = matches.get_one::<u32>("rate-limit-addr") {
        config = config.with_addr_attempts(attempts);
    }
    if let Some(&seconds) = matches.get_one::<i64>("rate-limit-window-secs") {
        config = config.with_rate_window_seconds(seconds);
    }
    config = config.with_secure_cookies(matches.get_flag("secure-cookies"));

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches.get_one::<String>("dsn").map(String::to_string),
        roster: matches.get_one::<PathBuf>("roster").cloned(),
        config,
    })
}
