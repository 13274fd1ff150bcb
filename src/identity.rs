//! Who is acting on a command.
//!
//! Quorum trusts the user id it is given; authentication happens upstream.
//! The id is resolved through a chain so it need not be repeated on every call:
//!
//! 1. `--as <user>`: explicit per-command override
//! 2. `QUORUM_USER` env var: session level
//! 3. `user` in `~/.quorum/config.toml`: global default

use std::env;

use crate::config::Config;

/// Error message shown when no user can be resolved.
pub const USER_REQUIRED: &str = "user required: pass --as <user>, \
    set QUORUM_USER, or add `user = \"...\"` to ~/.quorum/config.toml";

/// Resolve the acting user from the chain.
pub fn resolve_user(explicit: Option<&str>, config: &Config) -> Result<String, String> {
    resolve_from(explicit, env::var("QUORUM_USER").ok(), config)
}

fn resolve_from(explicit: Option<&str>, from_env: Option<String>, config: &Config) -> Result<String, String> {
    if let Some(user) = explicit.filter(|u| !u.is_empty()) {
        return Ok(user.to_string());
    }
    if let Some(user) = from_env.filter(|u| !u.is_empty()) {
        return Ok(user);
    }
    config
        .user
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| USER_REQUIRED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(user: Option<&str>) -> Config {
        Config {
            user: user.map(String::from),
            ..Config::default()
        }
    }

    #[test]
    fn explicit_wins() {
        let user = resolve_from(Some("bob"), Some("carol".into()), &config_with(Some("dave")));

        assert_eq!(user.unwrap(), "bob");
    }

    #[test]
    fn env_beats_config() {
        let user = resolve_from(None, Some("carol".into()), &config_with(Some("dave")));

        assert_eq!(user.unwrap(), "carol");
    }

    #[test]
    fn config_is_the_fallback() {
        let user = resolve_from(None, Some(String::new()), &config_with(Some("dave")));

        assert_eq!(user.unwrap(), "dave");
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let err = resolve_from(None, None, &config_with(None)).unwrap_err();

        assert_eq!(err, USER_REQUIRED);
    }
}
