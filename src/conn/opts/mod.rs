// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use percent_encoding::percent_decode;
use url::Url;

use std::{
    borrow::Cow, collections::HashMap, fmt, hash::Hash, str::FromStr, sync::Arc, time::Duration,
};

use crate::{
    conf::{resolve_byte_limit, MAX_MAX_ALLOWED_PACKET, MIN_MAX_ALLOWED_PACKET},
    conn::auth::AuthPluginRegistry,
    events::{default_sink, EventSink, NoopSink},
    UrlError,
};

/// Default value for client side per-connection statement cache.
pub const DEFAULT_STMT_CACHE_SIZE: usize = 32;

/// Shared handle compared by address.
pub(crate) struct Shared<T: ?Sized>(pub(crate) Arc<T>);

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T: ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Options structure is quite large so we'll store it separately.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct InnerOpts {
    /// Address of mysql server (defaults to `localhost`). Hostnames should also work.
    ip_or_hostname: url::Host,
    /// TCP port of mysql server (defaults to `3306`).
    tcp_port: u16,
    /// Path to unix socket (defaults to `None`).
    socket: Option<String>,
    user: Option<String>,
    pass: Option<String>,
    db_name: Option<String>,

    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,

    /// Prefer socket connection (defaults to `true`).
    ///
    /// Will reconnect via socket after TCP connection to a loopback address if `true`.
    /// Falls back to TCP on error.
    prefer_socket: bool,

    /// Whether to enable `TCP_NODELAY` (defaults to `true`).
    tcp_nodelay: bool,

    tcp_keepalive_time: Option<u32>,

    tcp_connect_timeout: Option<Duration>,

    /// Number of prepared statements cached on the client side (per connection).
    stmt_cache_size: usize,

    /// Byte bound of a single result set, in the `max_result_buffer` format.
    max_result_buffer: Option<String>,

    /// Outgoing packet bound. `None` lets the server's `@@max_allowed_packet` win.
    max_allowed_packet: Option<usize>,

    /// Overrides the detected heap capacity.
    max_heap_size: Option<u64>,

    connect_attrs: HashMap<String, String>,

    /// `None` stands for the `tracing` sink.
    event_sink: Option<Shared<dyn EventSink>>,

    /// `None` stands for the built-in plugins.
    auth_plugins: Option<Shared<AuthPluginRegistry>>,
}

impl Default for InnerOpts {
    fn default() -> Self {
        InnerOpts {
            ip_or_hostname: url::Host::Domain(String::from("localhost")),
            tcp_port: 3306,
            socket: None,
            user: None,
            pass: None,
            db_name: None,
            read_timeout: None,
            write_timeout: None,
            prefer_socket: true,
            tcp_nodelay: true,
            tcp_keepalive_time: None,
            tcp_connect_timeout: None,
            stmt_cache_size: DEFAULT_STMT_CACHE_SIZE,
            max_result_buffer: None,
            max_allowed_packet: None,
            max_heap_size: None,
            connect_attrs: HashMap::new(),
            event_sink: None,
            auth_plugins: None,
        }
    }
}

impl TryFrom<&'_ str> for Opts {
    type Error = UrlError;

    fn try_from(url: &'_ str) -> Result<Self, Self::Error> {
        Opts::from_url(url)
    }
}

/// Mysql connection options.
///
/// Build one with [`OptsBuilder`](struct.OptsBuilder.html).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Opts(pub(crate) Box<InnerOpts>);

impl Opts {
    #[doc(hidden)]
    pub fn addr_is_loopback(&self) -> bool {
        match self.0.ip_or_hostname {
            url::Host::Domain(ref name) => name == "localhost",
            url::Host::Ipv4(ref addr) => addr.is_loopback(),
            url::Host::Ipv6(ref addr) => addr.is_loopback(),
        }
    }

    pub fn from_url(url: &str) -> Result<Opts, UrlError> {
        from_url(url)
    }

    /// Address of mysql server (defaults to `localhost`). Hostnames should also work.
    pub fn get_ip_or_hostname(&self) -> Cow<'_, str> {
        self.0.ip_or_hostname.to_string().into()
    }

    /// TCP port of mysql server (defaults to `3306`).
    pub fn get_tcp_port(&self) -> u16 {
        self.0.tcp_port
    }

    /// Socket path (defaults to `None`).
    pub fn get_socket(&self) -> Option<&str> {
        self.0.socket.as_deref()
    }

    pub fn get_user(&self) -> Option<&str> {
        self.0.user.as_deref()
    }

    pub fn get_pass(&self) -> Option<&str> {
        self.0.pass.as_deref()
    }

    pub fn get_db_name(&self) -> Option<&str> {
        self.0.db_name.as_deref()
    }

    /// The timeout for each attempt to read from the server.
    pub fn get_read_timeout(&self) -> Option<Duration> {
        self.0.read_timeout
    }

    /// The timeout for each attempt to write to the server.
    pub fn get_write_timeout(&self) -> Option<Duration> {
        self.0.write_timeout
    }

    /// Prefer socket connection (defaults to `true`).
    ///
    /// Will reconnect via socket after TCP connection to a loopback address if `true`.
    ///
    /// Will fall back to TCP on error. Use `socket` option to enforce socket connection.
    pub fn get_prefer_socket(&self) -> bool {
        self.0.prefer_socket
    }

    /// Whether `TCP_NODELAY` will be set for mysql connection.
    pub fn get_tcp_nodelay(&self) -> bool {
        self.0.tcp_nodelay
    }

    /// TCP keep alive time for mysql connection.
    pub fn get_tcp_keepalive_time_ms(&self) -> Option<u32> {
        self.0.tcp_keepalive_time
    }

    pub fn get_tcp_connect_timeout(&self) -> Option<Duration> {
        self.0.tcp_connect_timeout
    }

    /// Number of prepared statements cached on the client side (per connection).
    /// Defaults to [`DEFAULT_STMT_CACHE_SIZE`].
    pub fn get_stmt_cache_size(&self) -> usize {
        self.0.stmt_cache_size
    }

    /// Byte bound of a single result set (defaults to `None`, no bound).
    ///
    /// The value is resolved against the heap size when a connection opens, see
    /// [`resolve_byte_limit`](crate::conf::resolve_byte_limit).
    pub fn get_max_result_buffer(&self) -> Option<&str> {
        self.0.max_result_buffer.as_deref()
    }

    /// Explicit `max_allowed_packet` (defaults to `None`, the server's value is used).
    pub fn get_max_allowed_packet(&self) -> Option<usize> {
        self.0.max_allowed_packet
    }

    /// Heap capacity override (defaults to `None`, total physical memory is used).
    pub fn get_max_heap_size(&self) -> Option<u64> {
        self.0.max_heap_size
    }

    /// Connect attributes sent in addition to the driver's own `_client_name`, `_client_version`,
    /// `_os`, `_platform` and `_pid`.
    pub fn get_connect_attrs(&self) -> &HashMap<String, String> {
        &self.0.connect_attrs
    }

    /// Receiver of driver events (defaults to [`TracingSink`](crate::events::TracingSink)).
    pub fn get_event_sink(&self) -> Arc<dyn EventSink> {
        match self.0.event_sink {
            Some(ref sink) => sink.0.clone(),
            None => default_sink(),
        }
    }

    /// Authentication plugins available to the handshake.
    pub fn get_auth_plugins(&self) -> Arc<AuthPluginRegistry> {
        self.0
            .auth_plugins
            .as_ref()
            .map(|registry| registry.0.clone())
            .unwrap_or_default()
    }
}

/// Provides a way to build [`Opts`](struct.Opts.html).
///
/// ```ignore
/// let builder = OptsBuilder::new()
///     .ip_or_hostname(Some("db.local"))
///     .user(Some("app"))
///     .max_result_buffer(Some("25pct"));
/// let conn = Conn::new(builder)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OptsBuilder {
    opts: Opts,
}

impl OptsBuilder {
    pub fn new() -> Self {
        OptsBuilder::default()
    }

    pub fn from_opts<T: Into<Opts>>(opts: T) -> Self {
        OptsBuilder { opts: opts.into() }
    }

    /// Use a HashMap for creating an OptsBuilder instance:
    /// ```ignore
    /// OptsBuilder::new().from_hash_map(client);
    /// ```
    /// `HashMap` key,value pairs:
    /// - user = Username
    /// - password = Password
    /// - host = Host name or ip address
    /// - port = Port, default is 3306
    /// - socket = Unix socket path, defaults to `None`
    /// - db_name = Database name (defaults to `None`).
    /// - prefer_socket = Prefer socket connection (defaults to `true`)
    /// - tcp_nodelay = Set `TCP_NODELAY` (defaults to `true`)
    /// - tcp_keepalive_time_ms = TCP keep alive time for mysql connection (defaults to `None`)
    /// - tcp_connect_timeout_ms = Tcp connect timeout (defaults to `None`)
    /// - read_timeout_ms, write_timeout_ms = Socket timeouts (defaults to `None`)
    /// - stmt_cache_size = Number of prepared statements cached on the client side (per connection)
    /// - max_result_buffer = Byte bound of a result set, e.g. `100M` or `25pct`
    /// - max_allowed_packet = Outgoing packet bound, `1024..=1073741824`
    /// - max_heap_size = Heap capacity in bytes used to resolve `max_result_buffer`
    pub fn from_hash_map(mut self, client: &HashMap<String, String>) -> Result<Self, UrlError> {
        for (key, value) in client.iter() {
            let opts = &mut self.opts.0;
            match key.as_str() {
                "user" => opts.user = Some(value.to_string()),
                "password" => opts.pass = Some(value.to_string()),
                "host" => {
                    opts.ip_or_hostname = url::Host::parse(value)
                        .unwrap_or_else(|_| url::Host::Domain(value.to_owned()));
                }
                "port" => opts.tcp_port = parse_value(key, value)?,
                "socket" => opts.socket = Some(value.to_string()),
                "db_name" => opts.db_name = Some(value.to_string()),
                "prefer_socket" => opts.prefer_socket = parse_value(key, value)?,
                "tcp_nodelay" => opts.tcp_nodelay = parse_value(key, value)?,
                "tcp_keepalive_time_ms" => {
                    opts.tcp_keepalive_time = Some(parse_value(key, value)?);
                }
                "tcp_connect_timeout_ms" => {
                    opts.tcp_connect_timeout = Some(Duration::from_millis(parse_value(key, value)?));
                }
                "read_timeout_ms" => {
                    opts.read_timeout = Some(Duration::from_millis(parse_value(key, value)?));
                }
                "write_timeout_ms" => {
                    opts.write_timeout = Some(Duration::from_millis(parse_value(key, value)?));
                }
                "stmt_cache_size" => opts.stmt_cache_size = parse_value(key, value)?,
                "max_result_buffer" => {
                    // format only, the heap is consulted when a connection opens
                    resolve_byte_limit(Some(value.as_str()), u64::MAX, &NoopSink)
                        .map_err(|_| UrlError::InvalidValue(key.to_string(), value.to_string()))?;
                    opts.max_result_buffer = Some(value.to_string());
                }
                "max_allowed_packet" => {
                    let parsed: usize = parse_value(key, value)?;
                    if !(MIN_MAX_ALLOWED_PACKET..=MAX_MAX_ALLOWED_PACKET).contains(&parsed) {
                        return Err(UrlError::InvalidValue(key.to_string(), value.to_string()));
                    }
                    opts.max_allowed_packet = Some(parsed);
                }
                "max_heap_size" => opts.max_heap_size = Some(parse_value(key, value)?),
                _ => {
                    //throw an error if there is an unrecognized param
                    return Err(UrlError::UnknownParameter(key.to_string()));
                }
            }
        }
        Ok(self)
    }

    /// Address of mysql server (defaults to `localhost`). Hostnames should also work.
    ///
    /// **Note:** IPv6 addresses must be given in square brackets, e.g. `[::1]`.
    pub fn ip_or_hostname<T: Into<String>>(mut self, ip_or_hostname: Option<T>) -> Self {
        let new = ip_or_hostname
            .map(Into::into)
            .unwrap_or_else(|| "localhost".into());
        self.opts.0.ip_or_hostname =
            url::Host::parse(&new).unwrap_or_else(|_| url::Host::Domain(new.to_owned()));
        self
    }

    /// TCP port of mysql server (defaults to `3306`).
    pub fn tcp_port(mut self, tcp_port: u16) -> Self {
        self.opts.0.tcp_port = tcp_port;
        self
    }

    /// Socket path (defaults to `None`).
    ///
    /// Can be defined using `socket` connection url parameter.
    pub fn socket<T: Into<String>>(mut self, socket: Option<T>) -> Self {
        self.opts.0.socket = socket.map(Into::into);
        self
    }

    /// User (defaults to `None`).
    pub fn user<T: Into<String>>(mut self, user: Option<T>) -> Self {
        self.opts.0.user = user.map(Into::into);
        self
    }

    /// Password (defaults to `None`).
    pub fn pass<T: Into<String>>(mut self, pass: Option<T>) -> Self {
        self.opts.0.pass = pass.map(Into::into);
        self
    }

    /// Database name (defaults to `None`).
    pub fn db_name<T: Into<String>>(mut self, db_name: Option<T>) -> Self {
        self.opts.0.db_name = db_name.map(Into::into);
        self
    }

    /// The timeout for each attempt to read from the server (defaults to `None`).
    ///
    /// Note that it is an error to pass the zero `Duration` to this method.
    pub fn read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.opts.0.read_timeout = read_timeout;
        self
    }

    /// The timeout for each attempt to write to the server (defaults to `None`).
    pub fn write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.opts.0.write_timeout = write_timeout;
        self
    }

    /// TCP keep alive time for mysql connection (defaults to `None`).
    ///
    /// Can be defined using `tcp_keepalive_time_ms` connection url parameter.
    pub fn tcp_keepalive_time_ms(mut self, tcp_keepalive_time_ms: Option<u32>) -> Self {
        self.opts.0.tcp_keepalive_time = tcp_keepalive_time_ms;
        self
    }

    /// Set the `TCP_NODELAY` option for the mysql connection (defaults to `true`).
    ///
    /// Setting this option to false re-enables Nagle's algorithm, which can cause unusually high
    /// latency (~40ms) but may increase maximum throughput.
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.opts.0.tcp_nodelay = nodelay;
        self
    }

    /// Prefer socket connection (defaults to `true`).
    ///
    /// Can be defined using `prefer_socket` connection url parameter.
    pub fn prefer_socket(mut self, prefer_socket: bool) -> Self {
        self.opts.0.prefer_socket = prefer_socket;
        self
    }

    /// Tcp connect timeout (defaults to `None`).
    ///
    /// Can be defined using `tcp_connect_timeout_ms` connection url parameter.
    pub fn tcp_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.opts.0.tcp_connect_timeout = timeout;
        self
    }

    /// Number of prepared statements cached on the client side (per connection).
    /// Defaults to [`DEFAULT_STMT_CACHE_SIZE`]. `0` disables the cache.
    ///
    /// Call with `None` to reset to default.
    pub fn stmt_cache_size<T>(mut self, cache_size: T) -> Self
    where
        T: Into<Option<usize>>,
    {
        self.opts.0.stmt_cache_size = cache_size.into().unwrap_or(DEFAULT_STMT_CACHE_SIZE);
        self
    }

    /// Byte bound of a single result set (defaults to `None`).
    ///
    /// Accepts `10`, `10K`, `10M`, `10G`, `10T` or `10p`, `10pct`, `10percent` of the heap.
    /// An invalid value makes [`Conn::open`](crate::Conn::open) fail with a `ConfigError`.
    pub fn max_result_buffer<T: Into<String>>(mut self, max_result_buffer: Option<T>) -> Self {
        self.opts.0.max_result_buffer = max_result_buffer.map(Into::into);
        self
    }

    /// Outgoing packet bound (defaults to `None`, the server's value is adopted).
    pub fn max_allowed_packet(mut self, max_allowed_packet: Option<usize>) -> Self {
        self.opts.0.max_allowed_packet = max_allowed_packet;
        self
    }

    /// Heap capacity used to resolve `max_result_buffer` (defaults to total physical memory).
    pub fn max_heap_size(mut self, max_heap_size: Option<u64>) -> Self {
        self.opts.0.max_heap_size = max_heap_size;
        self
    }

    /// Connect attributes.
    ///
    /// Attribute names that begin with an underscore (`_`) are reserved for the driver and
    /// are skipped.
    pub fn connect_attrs<T1: Into<String> + Eq + Hash, T2: Into<String>>(
        mut self,
        connect_attrs: HashMap<T1, T2>,
    ) -> Self {
        self.opts.0.connect_attrs = HashMap::with_capacity(connect_attrs.len());
        for (name, value) in connect_attrs {
            let name = name.into();
            if !name.starts_with('_') {
                self.opts.0.connect_attrs.insert(name, value.into());
            }
        }
        self
    }

    /// Receiver of driver events. `None` restores the `tracing` sink.
    pub fn event_sink(mut self, event_sink: Option<Arc<dyn EventSink>>) -> Self {
        self.opts.0.event_sink = event_sink.map(Shared);
        self
    }

    /// Authentication plugins. `None` restores the built-in set.
    pub fn auth_plugins(mut self, auth_plugins: Option<AuthPluginRegistry>) -> Self {
        self.opts.0.auth_plugins = auth_plugins.map(|registry| Shared(Arc::new(registry)));
        self
    }
}

impl From<OptsBuilder> for Opts {
    fn from(builder: OptsBuilder) -> Opts {
        builder.opts
    }
}

impl Default for OptsBuilder {
    fn default() -> OptsBuilder {
        OptsBuilder {
            opts: Opts::default(),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, UrlError> {
    value
        .parse::<T>()
        .map_err(|_| UrlError::InvalidValue(key.to_string(), value.to_string()))
}

fn decode_component(component: &str) -> String {
    percent_decode(component.as_bytes())
        .decode_utf8_lossy()
        .into_owned()
}

fn get_opts_user_from_url(url: &Url) -> Option<String> {
    Some(url.username())
        .filter(|user| !user.is_empty())
        .map(decode_component)
}

fn get_opts_pass_from_url(url: &Url) -> Option<String> {
    url.password().map(decode_component)
}

fn get_opts_db_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .next()
        .filter(|db_name| !db_name.is_empty())
        .map(decode_component)
}

fn from_url_basic(url_str: &str) -> Result<(Opts, Vec<(String, String)>), UrlError> {
    let url = Url::parse(url_str)?;
    if url.scheme() != "mysql" {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.cannot_be_a_base() {
        return Err(UrlError::BadUrl);
    }
    let user = get_opts_user_from_url(&url);
    let pass = get_opts_pass_from_url(&url);
    let ip_or_hostname = url
        .host()
        .ok_or(UrlError::BadUrl)
        .and_then(|host| url::Host::parse(&host.to_string()).map_err(|_| UrlError::BadUrl))?;
    let tcp_port = url.port().unwrap_or(3306);
    let db_name = get_opts_db_name_from_url(&url);

    let query_pairs = url.query_pairs().into_owned().collect();
    let opts = Opts(Box::new(InnerOpts {
        user,
        pass,
        ip_or_hostname,
        tcp_port,
        db_name,
        ..InnerOpts::default()
    }));

    Ok((opts, query_pairs))
}

fn from_url(url: &str) -> Result<Opts, UrlError> {
    let (opts, query_pairs) = from_url_basic(url)?;
    let hash_map = query_pairs.into_iter().collect::<HashMap<String, String>>();
    OptsBuilder::from_opts(opts)
        .from_hash_map(&hash_map)
        .map(Into::into)
}
