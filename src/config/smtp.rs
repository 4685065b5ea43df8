// src/config/smtp.rs
use crate::error::WatchError;

const ENV_HOST: &str = "WAITLY_SMTP_HOST";
const ENV_PORT: &str = "WAITLY_SMTP_PORT";
const ENV_USER: &str = "WAITLY_SMTP_USER";
const ENV_PASS: &str = "WAITLY_SMTP_PASS";
const ENV_FROM: &str = "WAITLY_MAIL_FROM";
const ENV_TO: &str = "WAITLY_MAIL_TO";

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Empty user means anonymous relay (no AUTH).
    pub user: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

impl SmtpConfig {
    /// Read SMTP settings from the environment.
    ///
    /// - nothing set at all → `Ok(None)`, mail is disabled for the run
    /// - host set but anything required missing/invalid → `Err(Config)`
    ///
    /// `WAITLY_MAIL_FROM` / `WAITLY_MAIL_TO` default to the SMTP user.
    pub fn from_env() -> Result<Option<Self>, WatchError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Option<Self>, WatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = read(ENV_HOST);
        let any_set = [ENV_HOST, ENV_PORT, ENV_USER, ENV_PASS, ENV_FROM, ENV_TO]
            .iter()
            .any(|k| read(k).is_some());
        if !any_set {
            return Ok(None);
        }
        let host = host.ok_or_else(|| WatchError::config(format!("Missing env: {ENV_HOST}")))?;

        let port = match read(ENV_PORT) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                WatchError::config(format!("{ENV_PORT} must be an integer, got: {raw:?}"))
            })?,
            None => DEFAULT_SMTP_PORT,
        };

        let user = read(ENV_USER).unwrap_or_default();
        let password = read(ENV_PASS).unwrap_or_default();
        if !user.is_empty() && password.is_empty() {
            return Err(WatchError::config(format!("{ENV_USER} set but {ENV_PASS} missing")));
        }

        let from = read(ENV_FROM)
            .or_else(|| (!user.is_empty()).then(|| user.clone()))
            .ok_or_else(|| WatchError::config(format!("Missing env: {ENV_FROM}")))?;
        let to_raw = read(ENV_TO)
            .or_else(|| (!user.is_empty()).then(|| user.clone()))
            .ok_or_else(|| WatchError::config(format!("Missing env: {ENV_TO}")))?;
        let to = split_recipients(&to_raw);
        if to.is_empty() {
            return Err(WatchError::config(format!(
                "{ENV_TO} parsed to empty recipient list"
            )));
        }

        Ok(Some(Self {
            host,
            port,
            user,
            password,
            from,
            to,
        }))
    }
}

/// Accepts "a@b.dk, c@d.dk; e@f.dk".
pub fn split_recipients(value: &str) -> Vec<String> {
    value
        .replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn unset_means_disabled() {
        assert_eq!(SmtpConfig::from_lookup(lookup(&[])).unwrap(), None);
    }

    #[test]
    fn partial_config_fails_fast() {
        let err = SmtpConfig::from_lookup(lookup(&[(ENV_TO, "me@x.dk")])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(ENV_HOST));

        let err = SmtpConfig::from_lookup(lookup(&[
            (ENV_HOST, "smtp.x.dk"),
            (ENV_PORT, "abc"),
            (ENV_TO, "me@x.dk"),
            (ENV_FROM, "bot@x.dk"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn stray_password_is_not_silently_ignored() {
        let err = SmtpConfig::from_lookup(lookup(&[(ENV_PASS, "secret")])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(ENV_HOST));
    }

    #[test]
    fn user_is_default_sender_and_recipient() {
        let cfg = SmtpConfig::from_lookup(lookup(&[
            (ENV_HOST, "smtp.x.dk"),
            (ENV_PORT, "2525"),
            (ENV_USER, "me@x.dk"),
            (ENV_PASS, "secret"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(cfg.port, 2525);
        assert_eq!(cfg.from, "me@x.dk");
        assert_eq!(cfg.to, vec!["me@x.dk".to_string()]);
    }

    #[test]
    fn recipients_split_on_comma_and_semicolon() {
        assert_eq!(
            split_recipients("a@b.dk, c@d.dk; e@f.dk;;"),
            vec!["a@b.dk", "c@d.dk", "e@f.dk"]
        );
    }
}
