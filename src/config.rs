//! Configuration structures for setting up a [`SessionState`].
//!
//! A config is built in three steps:
//!
//! 1. Name the local endpoint the plugin listens on and the remote endpoint
//!    of the proxy server.
//! 2. Provide the key shared with the server, either as raw bytes
//!    ([`SharedKey`]) or as the password it is derived from.
//! 3. Provide the server name presented in the disguised handshake, then
//!    optionally pick a browser fingerprint, a ticket lifetime and an idle
//!    timeout.
//!
//! Inside a SIP003 plugin process the same information arrives through
//! environment variables; see [`Config::from_env`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use quietwire::{Browser, Config, Endpoint};
//!
//! let config = Config::builder(
//!     Endpoint::new("127.0.0.1", 1984),
//!     Endpoint::new("203.0.113.7", 443),
//! )
//! .with_password("example key")
//! .with_server_name("www.example.com")
//! .with_browser(Browser::Firefox)
//! .with_idle_timeout(Some(Duration::from_secs(300)))
//! .build();
//!
//! assert_eq!(config.remote().to_string(), "203.0.113.7:443");
//! ```
//!
//! [`SessionState`]: crate::SessionState
use core::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use std::{collections::HashMap, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::{
    crypto::SharedKey,
    error::{ConfigError, Error},
    specification::{DEFAULT_TICKET_TIME_HINT_SECS, SERVER_NAME_MAX_LEN},
};

/// A host and port pair.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint. `host` may be a name or an IP literal.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port part.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Browser whose ClientHello layout the disguised handshake imitates.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Browser {
    /// Chrome cipher suite and extension order.
    ///
    /// This is the default fingerprint.
    #[default]
    Chrome,

    /// Firefox cipher suite and extension order.
    Firefox,
}

impl FromStr for Browser {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            _ => Err(ConfigError::InvalidOption {
                name: "Browser",
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration structure for setting up a [`SessionState`].
///
/// For details on constructing a `Config`, refer to the [`config`] module.
///
/// [`config`]: crate::config
/// [`SessionState`]: crate::SessionState
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Config {
    pub(crate) local: Endpoint,
    pub(crate) remote: Endpoint,
    pub(crate) shared_key: SharedKey,
    pub(crate) server_name: String,
    pub(crate) browser: Browser,
    pub(crate) ticket_time_hint: Duration,
    pub(crate) idle_timeout: Option<Duration>,
}

/// A builder for creating a [`Config`] instance.
///
/// To get a [`ConfigBuilder`], use [`Config::builder`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConfigBuilder<State> {
    state: State,
}

impl Config {
    /// Sets up the local listening endpoint and the remote server endpoint.
    pub fn builder(local: Endpoint, remote: Endpoint) -> ConfigBuilder<WantsKey> {
        ConfigBuilder {
            state: WantsKey { local, remote },
        }
    }

    /// Reads the configuration a SIP003 host hands to its plugin.
    ///
    /// | variable            | meaning                                  |
    /// |---------------------|------------------------------------------|
    /// | `SS_LOCAL_HOST`     | address the plugin listens on            |
    /// | `SS_LOCAL_PORT`     | port the plugin listens on               |
    /// | `SS_REMOTE_HOST`    | address of the proxy server              |
    /// | `SS_REMOTE_PORT`    | port of the proxy server, usually 443    |
    /// | `SS_PLUGIN_OPTIONS` | plugin options, see [`PluginOptions`]    |
    pub fn from_env() -> Result<Config, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`], with variables resolved through `lookup`.
    ///
    /// [`from_env`]: Config::from_env
    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingVariable { name })
        };
        let port = |name: &'static str| -> Result<u16, ConfigError> {
            let value = require(name)?;
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort { name, value })
        };

        let local = Endpoint::new(require("SS_LOCAL_HOST")?, port("SS_LOCAL_PORT")?);
        let remote = Endpoint::new(require("SS_REMOTE_HOST")?, port("SS_REMOTE_PORT")?);
        let options = PluginOptions::parse(&require("SS_PLUGIN_OPTIONS")?)?;
        Ok(options.into_config(local, remote)?)
    }

    /// The endpoint the listener binds.
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    /// The endpoint of the remote proxy server.
    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// The server name presented in the disguised handshake.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The imitated browser.
    pub fn browser(&self) -> Browser {
        self.browser
    }

    /// How long one session ticket stays unchanged.
    pub fn ticket_time_hint(&self) -> Duration {
        self.ticket_time_hint
    }

    /// How long a relay pair may go without traffic in either direction;
    /// `None` waits forever.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

impl ConfigBuilder<WantsKey> {
    /// Sets up the key shared with the server.
    pub fn with_shared_key(self, shared_key: SharedKey) -> ConfigBuilder<WantsServerName> {
        ConfigBuilder {
            state: WantsServerName {
                local: self.state.local,
                remote: self.state.remote,
                shared_key,
            },
        }
    }

    /// Derives the shared key from a password.
    pub fn with_password(self, password: &str) -> ConfigBuilder<WantsServerName> {
        self.with_shared_key(SharedKey::derive_from_password(password))
    }
}

impl ConfigBuilder<WantsServerName> {
    /// Sets the server name indication of the disguised handshake.
    ///
    /// ## Panic
    /// Panics if `server_name` is longer than 255 bytes.
    pub fn with_server_name(self, server_name: impl Into<String>) -> ConfigBuilder<WantsOptions> {
        let server_name = server_name.into();
        assert!(server_name.len() <= SERVER_NAME_MAX_LEN);
        ConfigBuilder {
            state: WantsOptions {
                local: self.state.local,
                remote: self.state.remote,
                shared_key: self.state.shared_key,
                server_name,
                browser: Browser::default(),
                ticket_time_hint: Duration::from_secs(DEFAULT_TICKET_TIME_HINT_SECS),
                idle_timeout: None,
            },
        }
    }
}

impl ConfigBuilder<WantsOptions> {
    /// Imitates the given browser. The default is [`Browser::Chrome`].
    pub fn with_browser(mut self, browser: Browser) -> Self {
        self.state.browser = browser;
        self
    }

    /// Sets how long one session ticket stays unchanged. The default is one
    /// hour.
    ///
    /// ## Panic
    /// Panics if `hint` is shorter than one second.
    pub fn with_ticket_time_hint(mut self, hint: Duration) -> Self {
        assert!(hint.as_secs() > 0);
        self.state.ticket_time_hint = hint;
        self
    }

    /// Closes a relay pair when one of its directions sees no data for
    /// `timeout`. The default is `None`: idle pairs are kept forever.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.state.idle_timeout = timeout;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> Config {
        Config {
            local: self.state.local,
            remote: self.state.remote,
            shared_key: self.state.shared_key,
            server_name: self.state.server_name,
            browser: self.state.browser,
            ticket_time_hint: self.state.ticket_time_hint,
            idle_timeout: self.state.idle_timeout,
        }
    }
}

/// Config builder state where the caller must supply the shared key.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct WantsKey {
    local: Endpoint,
    remote: Endpoint,
}

/// Config builder state where the caller must supply the server name.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct WantsServerName {
    local: Endpoint,
    remote: Endpoint,
    shared_key: SharedKey,
}

/// Config builder state where optional settings may be changed.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct WantsOptions {
    local: Endpoint,
    remote: Endpoint,
    shared_key: SharedKey,
    server_name: String,
    browser: Browser,
    ticket_time_hint: Duration,
    idle_timeout: Option<Duration>,
}

/// Plugin-specific options carried by `SS_PLUGIN_OPTIONS`.
///
/// Two forms are accepted:
///
/// * a SIP003 option string, `ServerName=www.example.com;Key=secret`, where
///   `\;`, `\=` and `\\` escape the separators;
/// * a path to a JSON file with the same keys:
///
/// ```json
/// { "ServerName": "www.example.com", "Key": "secret", "TicketTimeHint": 3600, "Browser": "chrome" }
/// ```
///
/// | key              | required | meaning                                    |
/// |------------------|----------|--------------------------------------------|
/// | `ServerName`     | yes      | SNI of the disguised handshake             |
/// | `Key`            | yes      | password the shared key is derived from    |
/// | `TicketTimeHint` | no       | ticket lifetime in seconds (default 3600)  |
/// | `Browser`        | no       | `chrome` (default) or `firefox`            |
/// | `IdleTimeout`    | no       | relay idle timeout in seconds, 0 = never   |
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginOptions {
    server_name: Option<String>,
    key: Option<String>,
    ticket_time_hint: Option<u64>,
    browser: Option<String>,
    idle_timeout: Option<u64>,
}

impl PluginOptions {
    /// Parses an option string, or the JSON file it names.
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        let options = options.trim();
        if options.contains('=') {
            Self::from_sip003(options)
        } else {
            Self::from_json_file(options)
        }
    }

    fn from_sip003(options: &str) -> Result<Self, ConfigError> {
        let mut pairs = parse_sip003_pairs(options)?;
        let number = |name: &'static str, value: Option<String>| -> Result<Option<u64>, ConfigError> {
            match value {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidOption { name, value }),
                None => Ok(None),
            }
        };

        let parsed = PluginOptions {
            server_name: pairs.remove("ServerName"),
            key: pairs.remove("Key"),
            ticket_time_hint: number("TicketTimeHint", pairs.remove("TicketTimeHint"))?,
            browser: pairs.remove("Browser"),
            idle_timeout: number("IdleTimeout", pairs.remove("IdleTimeout"))?,
        };
        for unknown in pairs.keys() {
            warn!(option = %unknown, "ignoring unknown plugin option");
        }
        Ok(parsed)
    }

    fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let failed = |reason: String| ConfigError::OptionsFile {
            path: path.to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| failed(e.to_string()))
    }

    /// Validates the options and combines them with the two endpoints.
    pub fn into_config(self, local: Endpoint, remote: Endpoint) -> Result<Config, ConfigError> {
        let server_name = self
            .server_name
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingOption { name: "ServerName" })?;
        if server_name.len() > SERVER_NAME_MAX_LEN {
            return Err(ConfigError::InvalidOption {
                name: "ServerName",
                value: server_name,
            });
        }
        let key = self
            .key
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingOption { name: "Key" })?;
        let browser = match self.browser {
            Some(browser) => browser.parse()?,
            None => Browser::default(),
        };

        let mut builder = Config::builder(local, remote)
            .with_password(&key)
            .with_server_name(server_name)
            .with_browser(browser);
        match self.ticket_time_hint {
            Some(0) => {
                return Err(ConfigError::InvalidOption {
                    name: "TicketTimeHint",
                    value: "0".to_string(),
                });
            }
            Some(secs) => builder = builder.with_ticket_time_hint(Duration::from_secs(secs)),
            None => {}
        }
        let idle_timeout = self
            .idle_timeout
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);
        Ok(builder.with_idle_timeout(idle_timeout).build())
    }
}

/// Splits `k=v;k=v` honouring backslash escapes.
fn parse_sip003_pairs(options: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut pairs = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = options.chars();

    let mut finish = |key: &mut String, value: &mut String, in_value: bool| {
        if key.is_empty() && !in_value {
            return Ok(());
        }
        if !in_value || key.is_empty() {
            return Err(ConfigError::MalformedOptions {
                fragment: format!("{}{}", key, value),
            });
        }
        pairs.insert(core::mem::take(key), core::mem::take(value));
        Ok(())
    };

    while let Some(c) = chars.next() {
        let target = if in_value { &mut value } else { &mut key };
        match c {
            '\\' => match chars.next() {
                Some(escaped) => target.push(escaped),
                None => {
                    return Err(ConfigError::MalformedOptions {
                        fragment: options.to_string(),
                    });
                }
            },
            '=' if !in_value => in_value = true,
            ';' => {
                finish(&mut key, &mut value, in_value)?;
                in_value = false;
            }
            c => target.push(c),
        }
    }
    finish(&mut key, &mut value, in_value)?;
    Ok(pairs)
}
