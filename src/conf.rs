//
// meli - jmap sync engine
//
// Copyright 2025 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! Account configuration.
//!
//! Settings arrive as a flat string map (usually a `[accounts.name]` TOML
//! table); [`JmapServerConf::new`] extracts and validates the keys the
//! engine understands.

use std::{str::FromStr, time::Duration};

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountSettings {
    pub name: String,
    #[serde(flatten)]
    pub extra: IndexMap<String, String>,
}

impl AccountSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: IndexMap::default(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Either `server_password`, or the output of `server_password_command`.
    pub fn server_password(&self) -> Result<String> {
        if let Some(cmd) = self.extra.get("server_password_command") {
            let output = std::process::Command::new("sh")
                .args(["-c", cmd])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .output()?;

            if output.status.success() {
                Ok(std::str::from_utf8(&output.stdout)?.trim_end().to_string())
            } else {
                Err(Error::new(format!(
                    "({}) server_password_command `{}` returned {}: {}",
                    self.name,
                    cmd,
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ))
                .set_kind(ErrorKind::Configuration))
            }
        } else if let Some(pass) = self.extra.get("server_password") {
            Ok(pass.to_owned())
        } else {
            Err(Error::new(format!(
                "Configuration error ({}): connection requires either server_password or \
                 server_password_command",
                self.name
            ))
            .set_kind(ErrorKind::Configuration))
        }
    }
}

/// Which channel delivers push state changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushChannel {
    #[default]
    None,
    WebSocket,
    EventSource,
}

impl FromStr for PushChannel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "false" | "off" => Ok(Self::None),
            "websocket" | "ws" => Ok(Self::WebSocket),
            "eventsource" | "sse" => Ok(Self::EventSource),
            other => Err(format!(
                "expected one of `none`, `websocket`, `eventsource`, got `{}`",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JmapServerConf {
    pub server_url: String,
    pub session_url: Option<String>,
    pub server_username: String,
    pub server_password: String,
    pub use_token: bool,
    pub danger_accept_invalid_certs: bool,
    pub timeout: Option<Duration>,
    pub push: PushChannel,
    pub ping_interval: Duration,
    pub max_reconnect_exponent: u32,
    pub reconnect_base_delay: Duration,
}

macro_rules! get_conf_val {
    ($s:ident[$var:literal]) => {
        $s.extra.get($var).ok_or_else(|| {
            Error::new(format!(
                "Configuration error ({}): JMAP connection requires the field `{}` set",
                $s.name.as_str(),
                $var
            ))
            .set_kind(ErrorKind::Configuration)
        })
    };
    ($s:ident[$var:literal], $default:expr) => {
        $s.extra
            .get($var)
            .map(|v| {
                <_>::from_str(v).map_err(|e| {
                    Error::new(format!(
                        "Configuration error ({}): Invalid value for field `{}`: {}\n{}",
                        $s.name.as_str(),
                        $var,
                        v,
                        e
                    ))
                    .set_kind(ErrorKind::Configuration)
                })
            })
            .unwrap_or_else(|| Ok($default))
    };
}

impl JmapServerConf {
    pub fn new(s: &AccountSettings) -> Result<Self> {
        let use_token: bool = get_conf_val!(s["use_token"], false)?;

        if use_token
            && !(s.extra.contains_key("server_password_command")
                ^ s.extra.contains_key("server_password"))
        {
            return Err(Error::new(format!(
                "({}) `use_token` use requires either the `server_password_command` set with a \
                 command that returns an Bearer token of your account, or `server_password` with \
                 the API Bearer token as a string.",
                s.name,
            ))
            .set_kind(ErrorKind::Configuration));
        }
        let session_url = s.extra.get("session_url").cloned();
        let server_url = match (s.extra.get("server_url"), session_url.as_ref()) {
            // A bare domain is reached over https.
            (Some(u), _) if !u.contains("://") => format!("https://{}", u.trim_end_matches('/')),
            (Some(u), _) => u.to_string(),
            (None, Some(u)) => u.to_string(),
            (None, None) => get_conf_val!(s["server_url"])?.to_string(),
        };
        for url in std::iter::once(&server_url).chain(session_url.iter()) {
            url::Url::parse(url).map_err(|err| {
                Error::new(format!(
                    "Configuration error ({}): `{}` is not a valid URL: {}",
                    s.name, url, err
                ))
                .set_kind(ErrorKind::Configuration)
            })?;
        }
        let ping_interval: u64 = get_conf_val!(s["ping_interval"], 60_u64)?;
        if ping_interval == 0 {
            return Err(Error::new(format!(
                "Configuration error ({}): `ping_interval` must be positive",
                s.name
            ))
            .set_kind(ErrorKind::Configuration));
        }
        Ok(Self {
            server_url,
            session_url,
            server_username: get_conf_val!(s["server_username"])?.to_string(),
            server_password: s.server_password()?,
            use_token,
            danger_accept_invalid_certs: get_conf_val!(s["danger_accept_invalid_certs"], false)?,
            timeout: get_conf_val!(s["timeout"], 16_u64).map(|t| {
                if t == 0 {
                    None
                } else {
                    Some(Duration::from_secs(t))
                }
            })?,
            push: get_conf_val!(s["push"], PushChannel::None)?,
            ping_interval: Duration::from_secs(ping_interval),
            max_reconnect_exponent: get_conf_val!(s["max_reconnect_exponent"], 7_u32)?,
            reconnect_base_delay: Duration::from_millis(get_conf_val!(
                s["reconnect_base_delay_ms"],
                1000_u64
            )?),
        })
    }

    /// Checks every recognised key and removes it from `s.extra`, so that
    /// whatever remains is unknown to this backend.
    pub fn validate_config(s: &mut AccountSettings) -> Result<()> {
        macro_rules! get_conf_val {
            ($s:ident[$var:literal]) => {
                $s.extra.shift_remove($var).ok_or_else(|| {
                    Error::new(format!(
                        "Configuration error ({}): JMAP connection requires the field `{}` set",
                        $s.name.as_str(),
                        $var
                    ))
                    .set_kind(ErrorKind::Configuration)
                })
            };
            ($s:ident[$var:literal], $default:expr) => {
                $s.extra
                    .shift_remove($var)
                    .map(|v| {
                        <_>::from_str(&v).map_err(|e| {
                            Error::new(format!(
                                "Configuration error ({}): Invalid value for field `{}`: {}\n{}",
                                $s.name.as_str(),
                                $var,
                                v,
                                e
                            ))
                            .set_kind(ErrorKind::Configuration)
                        })
                    })
                    .unwrap_or_else(|| Ok($default))
            };
        }
        let session_url = s.extra.shift_remove("session_url");
        if session_url.is_none() {
            get_conf_val!(s["server_url"])?;
        } else {
            s.extra.shift_remove("server_url");
        }
        get_conf_val!(s["server_username"])?;

        get_conf_val!(s["use_token"], false)?;
        // either of these two needed
        get_conf_val!(s["server_password"])
            .or_else(|_| get_conf_val!(s["server_password_command"]))?;

        get_conf_val!(s["danger_accept_invalid_certs"], false)?;
        get_conf_val!(s["timeout"], 16_u64)?;
        get_conf_val!(s["push"], PushChannel::None)?;
        get_conf_val!(s["ping_interval"], 60_u64)?;
        get_conf_val!(s["max_reconnect_exponent"], 7_u32)?;
        get_conf_val!(s["reconnect_base_delay_ms"], 1000_u64)?;
        Ok(())
    }

    pub fn session_endpoint(&self) -> Result<url::Url> {
        if let Some(u) = self.session_url.as_deref() {
            return Ok(url::Url::parse(u)?);
        }
        let mut url = url::Url::parse(&self.server_url)?;
        if !url.path().ends_with("/.well-known/jmap") {
            url.set_path("/.well-known/jmap");
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(toml_str: &str) -> AccountSettings {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_jmap_conf_defaults() {
        let s = settings(
            r#"
name = "personal"
server_url = "https://jmap.example.com"
server_username = "user@example.com"
server_password = "hunter2"
"#,
        );
        let conf = JmapServerConf::new(&s).unwrap();
        assert_eq!(conf.timeout, Some(Duration::from_secs(16)));
        assert_eq!(conf.push, PushChannel::None);
        assert_eq!(conf.ping_interval, Duration::from_secs(60));
        assert_eq!(conf.max_reconnect_exponent, 7);
        assert_eq!(conf.reconnect_base_delay, Duration::from_millis(1000));
        assert!(!conf.use_token);
        assert_eq!(
            conf.session_endpoint().unwrap().as_str(),
            "https://jmap.example.com/.well-known/jmap"
        );
    }

    #[test]
    fn test_jmap_conf_bare_domain() {
        let s = AccountSettings::new("domain")
            .with("server_url", "jmap.example.org")
            .with("server_username", "user@example.org")
            .with("server_password", "hunter2");
        let conf = JmapServerConf::new(&s).unwrap();
        assert_eq!(conf.server_url, "https://jmap.example.org");
        assert_eq!(
            conf.session_endpoint().unwrap().as_str(),
            "https://jmap.example.org/.well-known/jmap"
        );

        let s = s.with("server_url", "http://localhost:8080");
        assert_eq!(
            JmapServerConf::new(&s).unwrap().server_url,
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_jmap_conf_explicit_values() {
        let s = settings(
            r#"
name = "work"
session_url = "https://api.example.com/jmap/session"
server_username = "user"
server_password = "token"
use_token = "true"
timeout = "0"
push = "websocket"
"#,
        );
        let conf = JmapServerConf::new(&s).unwrap();
        assert_eq!(conf.timeout, None);
        assert_eq!(conf.push, PushChannel::WebSocket);
        assert_eq!(
            conf.session_endpoint().unwrap().as_str(),
            "https://api.example.com/jmap/session"
        );
    }

    #[test]
    fn test_jmap_conf_errors() {
        let s = settings(
            r#"
name = "broken"
server_url = "https://jmap.example.com"
server_password = "x"
"#,
        );
        let err = JmapServerConf::new(&s).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.summary.contains("server_username"), "{}", err);

        let s = AccountSettings::new("broken")
            .with("server_url", "https://jmap.example.com")
            .with("server_username", "u")
            .with("server_password", "p")
            .with("push", "carrier-pigeon");
        let err = JmapServerConf::new(&s).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.summary.contains("`push`"), "{}", err);
    }

    #[test]
    fn test_jmap_validate_config_consumes_known_keys() {
        let mut s = AccountSettings::new("acc")
            .with("server_url", "https://jmap.example.com")
            .with("server_username", "u")
            .with("server_password", "p")
            .with("ping_interval", "30")
            .with("unknown_key", "v");
        JmapServerConf::validate_config(&mut s).unwrap();
        assert_eq!(s.extra.len(), 1);
        assert!(s.extra.contains_key("unknown_key"));
    }
}
