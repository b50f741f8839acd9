//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Both halves of binge
//! are configured entirely through environment variables with documented
//! defaults; there is no other persisted state.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::bridge;
use crate::control;
use crate::generator::pool;

/// Errors produced by configuration parsing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A variable was set to something unparseable.
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// Why it did not parse.
        reason: String,
    },
    /// A delay variable was set to a negative or non-finite value.
    #[error("{name} must be a non-negative finite number of seconds, got {value}")]
    BadDelay {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: f64,
    },
    /// A delay lower bound exceeds its upper bound.
    #[error("{min_name} ({min}) must not exceed {max_name} ({max})")]
    DisorderedBounds {
        /// Lower bound variable name.
        min_name: &'static str,
        /// Upper bound variable name.
        max_name: &'static str,
        /// Lower bound value.
        min: f64,
        /// Upper bound value.
        max: f64,
    },
}

fn parse_var<T, L>(lookup: &L, name: &'static str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|err: T::Err| Error::Invalid {
            name,
            value: raw,
            reason: err.to_string(),
        }),
    }
}

fn parse_optional_var<T, L>(lookup: &L, name: &'static str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err: T::Err| Error::Invalid {
                name,
                value: raw,
                reason: err.to_string(),
            }),
    }
}

fn check_delay(name: &'static str, value: f64) -> Result<(), Error> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::BadDelay { name, value })
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("dataset/netflix_dataset.csv")
}

/// Configuration for the simulator process.
///
/// | Variable            | Default                        |
/// |---------------------|--------------------------------|
/// | `WS_SERVER_URL`     | `ws://127.0.0.1:8080/ws`       |
/// | `NUM_THREADS`       | `3`                            |
/// | `MAX_THREADS`       | `10`                           |
/// | `TRAFFIC_MIN_DELAY` | `1.0`                          |
/// | `TRAFFIC_MAX_DELAY` | `4.0`                          |
/// | `RECONNECT_DELAY`   | `2.0`                          |
/// | `SEED`              | unset (random per start)       |
/// | `CONTROL_ADDR`      | `0.0.0.0:8000`                 |
/// | `CATALOG_PATH`      | `dataset/netflix_dataset.csv`  |
/// | `PROMETHEUS_ADDR`   | unset (exporter disabled)      |
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Worker pool configuration.
    pub pool: pool::Config,
    /// Control surface configuration.
    pub control: control::Config,
    /// Path to the catalog dataset.
    pub catalog_path: PathBuf,
    /// Prometheus exporter address; the exporter is disabled when absent.
    pub prometheus_addr: Option<SocketAddr>,
}

impl SimulatorConfig {
    /// Read the simulator configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Function will return an error if any set variable fails to parse or
    /// the delay bounds are inconsistent.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the simulator configuration through `lookup`, falling back to
    /// the documented default for every absent variable.
    ///
    /// # Errors
    ///
    /// Function will return an error if any present variable fails to parse
    /// or the delay bounds are inconsistent.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, Error>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = pool::Config::default();

        let endpoint = lookup("WS_SERVER_URL").unwrap_or(defaults.endpoint);
        let default_workers = parse_var(&lookup, "NUM_THREADS", defaults.default_workers)?;
        let max_workers = parse_var(&lookup, "MAX_THREADS", defaults.max_workers)?;
        let min_delay = parse_var(&lookup, "TRAFFIC_MIN_DELAY", defaults.min_delay)?;
        let max_delay = parse_var(&lookup, "TRAFFIC_MAX_DELAY", defaults.max_delay)?;
        let reconnect_delay = parse_var(&lookup, "RECONNECT_DELAY", defaults.reconnect_delay)?;
        let seed = parse_optional_var(&lookup, "SEED")?;

        check_delay("TRAFFIC_MIN_DELAY", min_delay)?;
        check_delay("TRAFFIC_MAX_DELAY", max_delay)?;
        check_delay("RECONNECT_DELAY", reconnect_delay)?;
        if min_delay > max_delay {
            return Err(Error::DisorderedBounds {
                min_name: "TRAFFIC_MIN_DELAY",
                max_name: "TRAFFIC_MAX_DELAY",
                min: min_delay,
                max: max_delay,
            });
        }

        let control_addr = parse_var(
            &lookup,
            "CONTROL_ADDR",
            control::Config::default().binding_addr,
        )?;
        let catalog_path = lookup("CATALOG_PATH")
            .map_or_else(default_catalog_path, PathBuf::from);
        let prometheus_addr = parse_optional_var(&lookup, "PROMETHEUS_ADDR")?;

        Ok(Self {
            pool: pool::Config {
                endpoint,
                default_workers,
                max_workers,
                min_delay,
                max_delay,
                reconnect_delay,
                stagger_min: defaults.stagger_min,
                stagger_max: defaults.stagger_max,
                seed,
            },
            control: control::Config {
                binding_addr: control_addr,
            },
            catalog_path,
            prometheus_addr,
        })
    }
}

/// Configuration for the bridge process.
///
/// | Variable          | Default             |
/// |-------------------|---------------------|
/// | `WS_HOST`         | `0.0.0.0`           |
/// | `WS_PORT`         | `8080`              |
/// | `KAFKA_BROKER`    | `127.0.0.1:9092`    |
/// | `KAFKA_TOPIC`     | `video-stream-logs` |
/// | `PROMETHEUS_ADDR` | unset (disabled)    |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Bridge server configuration.
    pub bridge: bridge::Config,
    /// Prometheus exporter address; the exporter is disabled when absent.
    pub prometheus_addr: Option<SocketAddr>,
}

impl BridgeConfig {
    /// Read the bridge configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Function will return an error if any set variable fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the bridge configuration through `lookup`, falling back to the
    /// documented default for every absent variable.
    ///
    /// # Errors
    ///
    /// Function will return an error if any present variable fails to parse.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, Error>
    where
        L: Fn(&str) -> Option<String>,
    {
        let host = lookup("WS_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_var(&lookup, "WS_PORT", 8080)?;
        let raw_addr = format!("{host}:{port}");
        let binding_addr: SocketAddr = raw_addr.parse().map_err(|err: std::net::AddrParseError| {
            Error::Invalid {
                name: "WS_HOST",
                value: raw_addr,
                reason: err.to_string(),
            }
        })?;

        let bootstrap_server =
            lookup("KAFKA_BROKER").unwrap_or_else(|| "127.0.0.1:9092".to_string());
        let topic = lookup("KAFKA_TOPIC").unwrap_or_else(|| "video-stream-logs".to_string());
        let prometheus_addr = parse_optional_var(&lookup, "PROMETHEUS_ADDR")?;

        Ok(Self {
            bridge: bridge::Config {
                binding_addr,
                bootstrap_server,
                topic,
                producer_config: None,
            },
            prometheus_addr,
        })
    }
}
