use std::time::Duration;

use crate::error::StompError;

/// One candidate broker address in the failover sequence.
///
/// Immutable once built; the failover policy rotates whole specs rather
/// than mutating them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub login: String,
    pub passcode: String,
    pub host: String,
    pub port: u16,
    /// Connect over TLS instead of plain TCP.
    pub ssl: bool,
}

impl HostSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            login: String::new(),
            passcode: String::new(),
            host: host.into(),
            port,
            ssl: false,
        }
    }

    /// Set login and passcode (builder style).
    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = login.into();
        self.passcode = passcode.into();
        self
    }

    /// Switch the transport to TLS (builder style).
    pub fn tls(mut self) -> Self {
        self.ssl = true;
        self
    }

    /// Default STOMP port for the transport kind: 61612 for TLS, 61613
    /// for plain TCP.
    pub fn default_port(ssl: bool) -> u16 {
        if ssl { 61612 } else { 61613 }
    }
}

/// Failover and reconnect settings, built once at construction.
///
/// With `reliable` set (the default), transport failures are handled by
/// rotating through `hosts` with backoff instead of surfacing the first
/// error to the caller.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Ordered candidate brokers. Rotation moves a failed front host to
    /// the back.
    pub hosts: Vec<HostSpec>,
    pub reliable: bool,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    /// 0 means retry without limit.
    pub max_reconnect_attempts: u32,
    /// Shuffle the host list once at construction.
    pub randomize: bool,
    /// Extra headers sent with every CONNECT frame.
    pub connect_headers: Vec<(String, String)>,
    /// Where `unreceive` forwards messages that spent their redelivery
    /// budget.
    pub dead_letter_queue: String,
    pub max_redeliveries: u32,
}

impl FailoverConfig {
    pub fn new(hosts: Vec<HostSpec>) -> Self {
        Self {
            hosts,
            reliable: true,
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(30),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            max_reconnect_attempts: 0,
            randomize: false,
            connect_headers: Vec::new(),
            dead_letter_queue: "/queue/DLQ".to_string(),
            max_redeliveries: 6,
        }
    }

    /// Merge loosely-typed option entries over the defaults.
    ///
    /// Keys may arrive in camelCase ("maxReconnectAttempts") or snake_case
    /// and are normalized before matching. Unrecognized keys are ignored;
    /// a value that fails to parse is a [`StompError::Config`].
    /// `connect_headers` has no scalar representation and is only settable
    /// as a struct field.
    pub fn apply_options<'a, I>(mut self, options: I) -> Result<Self, StompError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in options {
            let key = uncamelize(key);
            match key.as_str() {
                "reliable" => self.reliable = parse_value(&key, value)?,
                "initial_reconnect_delay" => {
                    self.initial_reconnect_delay = parse_delay(&key, value)?;
                }
                "max_reconnect_delay" => self.max_reconnect_delay = parse_delay(&key, value)?,
                "use_exponential_back_off" => {
                    self.use_exponential_back_off = parse_value(&key, value)?;
                }
                "back_off_multiplier" => self.back_off_multiplier = parse_multiplier(&key, value)?,
                "max_reconnect_attempts" => self.max_reconnect_attempts = parse_value(&key, value)?,
                "randomize" => self.randomize = parse_value(&key, value)?,
                "dead_letter_queue" => self.dead_letter_queue = value.to_string(),
                "max_redeliveries" => self.max_redeliveries = parse_value(&key, value)?,
                _ => tracing::debug!(key = %key, "ignoring unrecognized connection option"),
            }
        }
        Ok(self)
    }
}

/// Convert a camelCase option key to snake_case
/// ("backOffMultiplier" -> "back_off_multiplier"). Snake_case input passes
/// through unchanged.
pub fn uncamelize(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StompError> {
    value
        .trim()
        .parse()
        .map_err(|_| StompError::Config(format!("invalid value for {}: {:?}", key, value)))
}

/// Backoff multipliers must be finite and at least 1, so a grown delay
/// never shrinks or goes negative.
fn parse_multiplier(key: &str, value: &str) -> Result<f64, StompError> {
    let multiplier: f64 = parse_value(key, value)?;
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(StompError::Config(format!(
            "invalid value for {}: {:?}",
            key, value
        )));
    }
    Ok(multiplier)
}

/// Delays are given in seconds, fractional values allowed
/// (e.g. "0.01" for ten milliseconds).
fn parse_delay(key: &str, value: &str) -> Result<Duration, StompError> {
    let secs: f64 = parse_value(key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(StompError::Config(format!(
            "invalid value for {}: {:?}",
            key, value
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}
