//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "catalog";
const ENV_PREFIX: &str = "CATALOG";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_CACHE_SHARDS: usize = 16;
const DEFAULT_CACHE_SWEEP_SECS: u64 = 30;

/// Command-line arguments for the catalog binary.
#[derive(Debug, Parser)]
#[command(name = "marquee", version, about = "Movie catalog read service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CATALOG_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the catalog HTTP service.
    Serve(Box<ServeArgs>),
    /// Load and validate configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the storage backend.
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// Override the seed file used by the in-memory backend.
    #[arg(long = "seed-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub seed_file: Option<PathBuf>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Toggle response caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the response cache TTL.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the response cache capacity.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Override the largest accepted page size.
    #[arg(long = "max-page-size", value_name = "COUNT")]
    pub max_page_size: Option<u32>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub catalog: CatalogSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub max_page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub capacity: NonZeroUsize,
    pub shards: NonZeroUsize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    database: RawDatabaseSettings,
    catalog: RawCatalogSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = Some(backend);
        }
        if let Some(path) = overrides.seed_file.as_ref() {
            self.storage.seed_file = Some(path.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(seconds);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(size) = overrides.max_page_size {
            self.catalog.max_page_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            database,
            catalog,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let storage = build_storage_settings(storage, &database)?;
        let catalog = build_catalog_settings(catalog)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            storage,
            database,
            catalog,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_storage_settings(
    storage: RawStorageSettings,
    database: &DatabaseSettings,
) -> Result<StorageSettings, LoadError> {
    let backend = storage.backend.unwrap_or(StorageBackend::Postgres);
    match backend {
        StorageBackend::Postgres if database.url.is_none() => {
            return Err(LoadError::invalid(
                "database.url",
                "required when storage.backend is `postgres`",
            ));
        }
        StorageBackend::Memory if storage.seed_file.is_none() => {
            return Err(LoadError::invalid(
                "storage.seed_file",
                "required when storage.backend is `memory`",
            ));
        }
        _ => {}
    }

    Ok(StorageSettings {
        backend,
        seed_file: storage.seed_file,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let max_page_size = non_zero_u32(
        catalog
            .max_page_size
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
            .into(),
        "catalog.max_page_size",
    )?;
    Ok(CatalogSettings { max_page_size })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let sweep_seconds = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_CACHE_SWEEP_SECS);
    if sweep_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    let capacity = NonZeroUsize::new(cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY))
        .unwrap_or(NonZeroUsize::MIN);
    let shards = cache
        .shards
        .unwrap_or(DEFAULT_CACHE_SHARDS)
        .clamp(1, capacity.get());
    let shards = NonZeroUsize::new(shards).unwrap_or(NonZeroUsize::MIN);

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_secs(ttl_seconds),
        capacity,
        shards,
        sweep_interval: Duration::from_secs(sweep_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<StorageBackend>,
    seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    max_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    capacity: Option<usize>,
    shards: Option<usize>,
    sweep_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn memory_raw() -> RawSettings {
        let mut raw = RawSettings::default();
        raw.storage.backend = Some(StorageBackend::Memory);
        raw.storage.seed_file = Some(PathBuf::from("seed.toml"));
        raw
    }

    #[test]
    fn defaults_resolve_for_memory_backend() {
        let settings = Settings::from_raw(memory_raw()).expect("valid settings");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
        assert_eq!(settings.catalog.max_page_size.get(), 100);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.ttl, Duration::from_secs(60));
        assert_eq!(settings.cache.capacity.get(), 1024);
        assert_eq!(settings.cache.shards.get(), 16);
        assert_eq!(settings.database.max_connections.get(), 8);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = memory_raw();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            port: Some(4321),
            log_level: Some("debug".to_string()),
            cache_ttl_seconds: Some(5),
            max_page_size: Some(20),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.ttl, Duration::from_secs(5));
        assert_eq!(settings.catalog.max_page_size.get(), 20);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = memory_raw();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let err = Settings::from_raw(RawSettings::default()).expect_err("missing url");
        assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));

        let mut raw = RawSettings::default();
        raw.database.url = Some("postgres://localhost/catalog".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.storage.backend, StorageBackend::Postgres);
    }

    #[test]
    fn memory_backend_requires_seed_file() {
        let mut raw = RawSettings::default();
        raw.storage.backend = Some(StorageBackend::Memory);
        let err = Settings::from_raw(raw).expect_err("missing seed");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "storage.seed_file",
                ..
            }
        ));
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut raw = memory_raw();
        raw.catalog.max_page_size = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = memory_raw();
        raw.cache.ttl_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = memory_raw();
        raw.server.port = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cache_shards_are_clamped_to_capacity() {
        let mut raw = memory_raw();
        raw.cache.capacity = Some(4);
        raw.cache.shards = Some(64);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.shards.get(), 4);

        let mut raw = memory_raw();
        raw.cache.capacity = Some(0);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.capacity.get(), 1);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = memory_raw();
        raw.logging.level = Some("chatty".to_string());
        let err = Settings::from_raw(raw).expect_err("bad level");
        assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
    }

    #[test]
    #[serial]
    fn environment_overrides_config_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[storage]\nbackend = \"memory\"\nseed_file = \"seed.toml\"\n\n[cache]\nttl_seconds = 7"
        )
        .expect("write config");

        // SAFETY: serialized with every other test that reads the environment.
        unsafe { std::env::set_var("CATALOG__CACHE__TTL_SECONDS", "11") };
        let cli = CliArgs::parse_from([
            "marquee",
            "--config-file",
            file.path().to_str().expect("utf-8 path"),
        ]);
        let loaded = load(&cli);
        unsafe { std::env::remove_var("CATALOG__CACHE__TTL_SECONDS") };

        let settings = loaded.expect("valid settings");
        assert_eq!(settings.cache.ttl, Duration::from_secs(11));
    }

    #[test]
    #[serial]
    fn config_file_layer_is_applied() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[storage]\nbackend = \"memory\"\nseed_file = \"seed.toml\"\n\n[cache]\nttl_seconds = 7\n\n[server]\nport = 9191"
        )
        .expect("write config");

        let cli = CliArgs::parse_from([
            "marquee",
            "--config-file",
            file.path().to_str().expect("utf-8 path"),
            "serve",
        ]);
        let settings = load(&cli).expect("valid settings");
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.cache.ttl, Duration::from_secs(7));
        assert_eq!(settings.server.addr.port(), 9191);
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["marquee"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "marquee",
            "serve",
            "--host",
            "0.0.0.0",
            "--storage-backend",
            "memory",
            "--seed-file",
            "/tmp/seed.toml",
            "--cache-capacity",
            "32",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.storage_backend,
                    Some(StorageBackend::Memory)
                );
                assert_eq!(
                    serve.overrides.seed_file.as_deref(),
                    Some(std::path::Path::new("/tmp/seed.toml"))
                );
                assert_eq!(serve.overrides.cache_capacity, Some(32));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_check_config_command() {
        let args = CliArgs::parse_from(["marquee", "check-config", "--database-url", "postgres://x"]);
        match args.command.expect("check-config command") {
            Command::CheckConfig(check) => {
                assert_eq!(check.overrides.database_url.as_deref(), Some("postgres://x"));
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
