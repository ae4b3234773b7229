use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use crate::{column::Registry, compress::Method, settings::Settings};

/// Credentials and target database sent during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Auth {
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            database: "default".into(),
            username: "default".into(),
            password: String::new(),
        }
    }
}

/// TLS settings. Only honoured when the crate is built with the `tls` feature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file with the CA certificates to trust. Defaults to the Mozilla root set.
    pub ca_file: Option<PathBuf>,

    /// Name to verify the certificate against. Defaults to the host part of the address.
    pub server_name: Option<String>,

    /// Skip certificate verification entirely. Testing only.
    pub insecure_skip_verify: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

impl Compression {
    pub fn enabled(self) -> bool {
        self != Compression::None
    }

    pub(crate) fn method(self) -> Method {
        match self {
            Compression::None => Method::None,
            Compression::Lz4 => Method::Lz4,
        }
    }
}

/// Order in which addresses are tried when a new connection is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenStrategy {
    /// Always start with the first address and fall through the list.
    #[default]
    InOrder,
    /// Rotate the starting address for every new connection.
    RoundRobin,
}

impl FromStr for OpenStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_order" => Ok(OpenStrategy::InOrder),
            "round_robin" => Ok(OpenStrategy::RoundRobin),
            other => Err(format!("unknown open strategy '{other}'")),
        }
    }
}

impl fmt::Display for OpenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenStrategy::InOrder => write!(f, "in_order"),
            OpenStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Connection options.
#[derive(Clone, Debug)]
pub struct Options {
    pub tls: Option<TlsConfig>,

    /// Time allowed for TCP connect and for the handshake.
    pub dial_timeout: Duration,

    /// Deadline for ping, exec, batch and the synchronous part of a query. `None` waits forever.
    pub read_timeout: Option<Duration>,

    /// Connection level settings, sent with every query.
    pub settings: Settings,

    pub compression: Compression,

    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub conn_max_lifetime: Duration,
    pub conn_open_strategy: OpenStrategy,

    /// Client identity reported in the handshake and in every query.
    pub client_name: String,
    pub client_hostname: String,
    pub os_user: String,

    /// Column codecs available for decoding.
    pub registry: Arc<Registry>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tls: None,
            dial_timeout: Duration::from_secs(1),
            read_timeout: None,
            settings: Settings::default(),
            compression: Compression::None,
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime: Duration::from_secs(60 * 60),
            conn_open_strategy: OpenStrategy::InOrder,
            client_name: concat!("tundra/", env!("CARGO_PKG_VERSION")).into(),
            client_hostname: "localhost".into(),
            os_user: String::new(),
            registry: Arc::new(Registry::default()),
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.options.tls = Some(tls);
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.options.dial_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = Some(timeout);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.options.settings = settings;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.options.compression = compression;
        self
    }

    pub fn max_open_conns(mut self, n: usize) -> Self {
        self.options.max_open_conns = n;
        self
    }

    pub fn max_idle_conns(mut self, n: usize) -> Self {
        self.options.max_idle_conns = n;
        self
    }

    pub fn conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.options.conn_max_lifetime = lifetime;
        self
    }

    pub fn conn_open_strategy(mut self, strategy: OpenStrategy) -> Self {
        self.options.conn_open_strategy = strategy;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.options.client_name = name.into();
        self
    }

    pub fn client_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.options.client_hostname = hostname.into();
        self
    }

    pub fn os_user(mut self, user: impl Into<String>) -> Self {
        self.options.os_user = user.into();
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.options.registry = Arc::new(registry);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
