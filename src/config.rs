//! Configuration loader for the presale desk.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults
//!   2) Config file (auto-discovered or explicit path)
//!   3) Environment variables (optionally via .env)
//!
//! Contract addresses, token metadata, RPC URL and chain id left blank are filled from
//! the selected network preset, so `PRESALE__NETWORK__PRESET=testnet` alone is a
//! complete testnet setup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config as cfg;
use directories::ProjectDirs;
use dotenvy::dotenv;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::aggregator::{SaleContracts, TokenInfo};
use crate::client::ClientTiming;
use crate::poller::PollerConfig;
use crate::telemetry::LoggingConfig;
use crate::units::MAX_DECIMALS;

const ENV_PREFIX: &str = "PRESALE";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub network: Network,
    pub contracts: Contracts,
    pub polling: Polling,
    pub account: Account,
    pub telemetry: Telemetry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub name: String,
    /// "prod" | "staging" | "dev".
    pub environment: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPreset {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkPreset::Mainnet => "mainnet",
            NetworkPreset::Testnet => "testnet",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub preset: NetworkPreset,
    /// Blank: preset endpoint.
    pub rpc_url: String,
    /// `None`: preset chain id.
    pub chain_id: Option<u64>,
    /// Upper bound for the connect-time chain id retries.
    #[serde(with = "humantime_serde")]
    pub connect_retry: Duration,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub address: String,
    pub decimals: Option<u32>,
    pub symbol: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Contracts {
    pub sale: String,
    pub sale_token: TokenConfig,
    pub payment_token: TokenConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub confirmation_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub provider_delay: Duration,
    /// Unset: wait for inclusion indefinitely.
    #[serde(default, with = "humantime_serde")]
    pub confirmation_timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    /// Fixed sender; otherwise the node's first account is used.
    pub address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// RUST_LOG-like directive, e.g. "info,aethernova_presale=debug".
    /// Unset or blank defers to `RUST_LOG`.
    pub log_filter: Option<String>,
    pub json_logs: bool,
}

impl Default for App {
    fn default() -> Self {
        Self {
            name: "aethernova-presale".into(),
            environment: "prod".into(),
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self {
            preset: NetworkPreset::Mainnet,
            rpc_url: String::new(),
            chain_id: None,
            connect_retry: Duration::from_secs(30),
        }
    }
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            confirmation_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            provider_delay: Duration::from_secs(1),
            confirmation_timeout: None,
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            log_filter: None,
            json_logs: false,
        }
    }
}

/// Deployed addresses and endpoints of one network.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub chain_id: u64,
    pub rpc_url: &'static str,
    pub sale: &'static str,
    pub sale_token: (&'static str, u32, &'static str),
    pub payment_token: (&'static str, u32, &'static str),
}

pub const MAINNET: Preset = Preset {
    chain_id: 43114,
    rpc_url: "https://api.avax.network/ext/bc/C/rpc",
    sale: "0xade836a941fe3c76f7b8fcfb3ec15f2d9ef75df0",
    sale_token: ("0x5EeEa3C6a295Dc1F52D6ef39F8c8cdB69D4B13c4", 9, "aINDEX"),
    payment_token: ("0x130966628846bfd36ff31a822705796e8cb8c18d", 18, "MIM"),
};

pub const TESTNET: Preset = Preset {
    chain_id: 43113,
    rpc_url: "https://api.avax-test.network/ext/bc/C/rpc",
    sale: "0x2E020c30808F3c8Cf022b1bD308C5e4360ad9309",
    sale_token: ("0x5c030DE660a47fDa47E8c11fb18Cd85b2055A936", 9, "AMZN"),
    payment_token: ("0x65830dCA1a1914a59C0c591A5408088598D38aec", 9, "MIM"),
};

impl NetworkPreset {
    pub fn values(self) -> &'static Preset {
        match self {
            NetworkPreset::Mainnet => &MAINNET,
            NetworkPreset::Testnet => &TESTNET,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("invalid address for `{field}`: `{value}`")]
    InvalidAddress { field: &'static str, value: String },
    #[error("`{field}` decimals {value} out of range [0, {max}]", max = MAX_DECIMALS)]
    InvalidDecimals { field: &'static str, value: u32 },
    #[error("`{0}` must be non-zero")]
    ZeroInterval(&'static str),
    #[error("path not found `{0}`")]
    PathNotFound(String),
}

/// Load configuration: defaults → file(s) → environment.
/// Env prefix: `PRESALE__...`, nested fields separated by `__`.
///
/// Examples:
///   PRESALE__NETWORK__PRESET=testnet
///   PRESALE__POLLING__CONFIRMATION_TIMEOUT=10m
///   PRESALE__ACCOUNT__ADDRESS=0x...
///
/// `preset` (e.g. from `--testnet`) overrides every layer.
pub fn load(
    explicit_file: Option<&Path>,
    preset: Option<NetworkPreset>,
) -> Result<Config, ConfigError> {
    // no-op if absent
    let _ = dotenv();

    let mut builder = defaults()?;
    for path in discover_config_files(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }
    builder = builder.add_source(
        cfg::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );
    if let Some(p) = preset {
        builder = builder.set_override("network.preset", p.as_str())?;
    }
    finish(builder)
}

type Builder = cfg::builder::ConfigBuilder<cfg::builder::DefaultState>;

fn defaults() -> Result<Builder, ConfigError> {
    let d = Config::default();
    Ok(cfg::Config::builder()
        .set_default("app.name", d.app.name)?
        .set_default("app.environment", d.app.environment)?
        .set_default("network.preset", d.network.preset.as_str())?
        .set_default("network.rpc_url", d.network.rpc_url)?
        .set_default("network.connect_retry", "30s")?
        .set_default("polling.refresh_interval", "5s")?
        .set_default("polling.confirmation_interval", "1s")?
        .set_default("polling.settle_delay", "2s")?
        .set_default("polling.provider_delay", "1s")?
        .set_default("telemetry.json_logs", d.telemetry.json_logs)?)
}

fn finish(builder: Builder) -> Result<Config, ConfigError> {
    let mut cfg: Config = builder.build()?.try_deserialize()?;
    validate_and_normalize(&mut cfg)?;
    Ok(cfg)
}

/// Discover config files in precedence order:
/// - explicit path if provided
/// - $XDG_CONFIG_HOME/aethernova-presale/config.{yaml,yml,toml,json}
/// - ./presale.{yaml,yml,toml,json}
fn discover_config_files(explicit: Option<&Path>) -> Result<Vec<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(vec![p.to_path_buf()]);
        }
        return Err(ConfigError::PathNotFound(p.display().to_string()));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(pd) = ProjectDirs::from("io", "Aethernova", "aethernova-presale") {
        let cd = pd.config_dir();
        for ext in ["yaml", "yml", "toml", "json"] {
            candidates.push(cd.join(format!("config.{ext}")));
        }
    }
    for ext in ["yaml", "yml", "toml", "json"] {
        candidates.push(PathBuf::from(format!("presale.{ext}")));
    }

    Ok(candidates.into_iter().filter(|c| c.exists()).collect())
}

fn fill(slot: &mut String, preset: &str) {
    if slot.trim().is_empty() {
        *slot = preset.to_string();
    } else {
        *slot = slot.trim().to_string();
    }
}

fn fill_token(token: &mut TokenConfig, (address, decimals, symbol): (&str, u32, &str)) {
    fill(&mut token.address, address);
    fill(&mut token.symbol, symbol);
    token.decimals.get_or_insert(decimals);
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Fills preset values, then checks URL, addresses, decimals and intervals.
fn validate_and_normalize(cfg: &mut Config) -> Result<(), ConfigError> {
    cfg.app.environment = cfg.app.environment.to_lowercase();

    let preset = cfg.network.preset.values();
    fill(&mut cfg.network.rpc_url, preset.rpc_url);
    cfg.network.chain_id.get_or_insert(preset.chain_id);
    fill(&mut cfg.contracts.sale, preset.sale);
    fill_token(&mut cfg.contracts.sale_token, preset.sale_token);
    fill_token(&mut cfg.contracts.payment_token, preset.payment_token);

    let url = &cfg.network.rpc_url;
    match Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        _ => return Err(ConfigError::InvalidUrl(url.clone())),
    }

    parse_address("contracts.sale", &cfg.contracts.sale)?;
    parse_address("contracts.sale_token.address", &cfg.contracts.sale_token.address)?;
    parse_address(
        "contracts.payment_token.address",
        &cfg.contracts.payment_token.address,
    )?;
    if let Some(a) = &cfg.account.address {
        parse_address("account.address", a)?;
    }

    for (field, token) in [
        ("contracts.sale_token", &cfg.contracts.sale_token),
        ("contracts.payment_token", &cfg.contracts.payment_token),
    ] {
        let value = token.decimals.unwrap_or_default();
        if value > MAX_DECIMALS {
            return Err(ConfigError::InvalidDecimals { field, value });
        }
    }

    let p = &cfg.polling;
    for (field, d) in [
        ("polling.refresh_interval", p.refresh_interval),
        ("polling.confirmation_interval", p.confirmation_interval),
    ] {
        if d.is_zero() {
            return Err(ConfigError::ZeroInterval(field));
        }
    }
    if p.confirmation_timeout.is_some_and(|t| t.is_zero()) {
        return Err(ConfigError::ZeroInterval("polling.confirmation_timeout"));
    }

    Ok(())
}

impl Config {
    pub fn chain_id(&self) -> u64 {
        self.network
            .chain_id
            .unwrap_or(self.network.preset.values().chain_id)
    }

    pub fn sale_contracts(&self) -> Result<SaleContracts, ConfigError> {
        let token = |field: &'static str, t: &TokenConfig| -> Result<TokenInfo, ConfigError> {
            Ok(TokenInfo {
                address: parse_address(field, &t.address)?,
                decimals: t.decimals.unwrap_or_default(),
                symbol: t.symbol.clone(),
            })
        };
        Ok(SaleContracts {
            sale: parse_address("contracts.sale", &self.contracts.sale)?,
            sale_token: token("contracts.sale_token.address", &self.contracts.sale_token)?,
            payment_token: token(
                "contracts.payment_token.address",
                &self.contracts.payment_token,
            )?,
        })
    }

    pub fn account(&self) -> Result<Option<Address>, ConfigError> {
        self.account
            .address
            .as_deref()
            .map(|a| parse_address("account.address", a))
            .transpose()
    }

    pub fn client_timing(&self) -> ClientTiming {
        ClientTiming {
            settle_delay: self.polling.settle_delay,
            confirmation_interval: self.polling.confirmation_interval,
            confirmation_timeout: self.polling.confirmation_timeout,
        }
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            refresh_interval: self.polling.refresh_interval,
            provider_delay: self.polling.provider_delay,
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            filter: self
                .telemetry
                .log_filter
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_owned),
            json: self.telemetry.json_logs,
            ..LoggingConfig::default()
        }
    }
}

/// Shows only scheme and host of the RPC URL.
impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = Url::parse(&self.rpc_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{}://{h}/<redacted>", u.scheme())))
            .unwrap_or_else(|| "<unset>".into());
        f.debug_struct("Network")
            .field("preset", &self.preset)
            .field("rpc_url", &endpoint)
            .field("chain_id", &self.chain_id)
            .field("connect_retry", &self.connect_retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(s: &str) -> Result<Config, ConfigError> {
        finish(defaults()?.add_source(cfg::File::from_str(s, cfg::FileFormat::Toml)))
    }

    #[test]
    fn defaults_resolve_to_mainnet() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.chain_id(), 43114);
        assert_eq!(cfg.network.rpc_url, MAINNET.rpc_url);
        let c = cfg.sale_contracts().unwrap();
        assert_eq!(c.payment_token.decimals, 18);
        assert_eq!(c.payment_token.symbol, "MIM");
        assert_eq!(c.sale_token.symbol, "aINDEX");
        assert_eq!(c.sale, MAINNET.sale.parse::<Address>().unwrap());
        assert_eq!(cfg.polling.refresh_interval, Duration::from_secs(5));
        assert_eq!(cfg.polling.confirmation_timeout, None);
        assert_eq!(cfg.account().unwrap(), None);
    }

    #[test]
    fn log_filter_unset_defers_to_rust_log() {
        assert_eq!(from_toml("").unwrap().logging().filter, None);
        assert_eq!(
            from_toml("[telemetry]\nlog_filter = \"  \"").unwrap().logging().filter,
            None
        );
        let cfg = from_toml("[telemetry]\nlog_filter = \"warn,aethernova_presale=debug\"").unwrap();
        assert_eq!(
            cfg.logging().filter.as_deref(),
            Some("warn,aethernova_presale=debug")
        );
    }

    #[test]
    fn testnet_preset_fills_blanks_only() {
        let cfg = from_toml(
            r#"
            [network]
            preset = "testnet"

            [contracts.sale_token]
            symbol = "TEST"

            [polling]
            refresh_interval = "10s"
            confirmation_timeout = "2m"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chain_id(), 43113);
        let c = cfg.sale_contracts().unwrap();
        assert_eq!(c.payment_token.decimals, 9);
        assert_eq!(c.sale_token.symbol, "TEST");
        assert_eq!(c.sale, TESTNET.sale.parse::<Address>().unwrap());
        assert_eq!(cfg.poller().refresh_interval, Duration::from_secs(10));
        assert_eq!(
            cfg.client_timing().confirmation_timeout,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn override_wins_over_file() {
        let builder = defaults()
            .unwrap()
            .add_source(cfg::File::from_str(
                "[network]\npreset = \"mainnet\"",
                cfg::FileFormat::Toml,
            ))
            .set_override("network.preset", "testnet")
            .unwrap();
        assert_eq!(finish(builder).unwrap().chain_id(), 43113);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            from_toml("[network]\nrpc_url = \"not a url\""),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(matches!(
            from_toml("[network]\nrpc_url = \"ftp://example.org\""),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(matches!(
            from_toml("[contracts]\nsale = \"0x1234\""),
            Err(ConfigError::InvalidAddress { field: "contracts.sale", .. })
        ));
        assert!(matches!(
            from_toml("[contracts.payment_token]\ndecimals = 40"),
            Err(ConfigError::InvalidDecimals { value: 40, .. })
        ));
        assert!(matches!(
            from_toml("[polling]\nconfirmation_interval = \"0s\""),
            Err(ConfigError::ZeroInterval("polling.confirmation_interval"))
        ));
        assert!(matches!(
            from_toml("[account]\naddress = \"me\""),
            Err(ConfigError::InvalidAddress { field: "account.address", .. })
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(matches!(
            discover_config_files(Some(Path::new("/definitely/not/here.toml"))),
            Err(ConfigError::PathNotFound(_))
        ));
    }

    #[test]
    fn debug_hides_rpc_path() {
        let mut cfg = from_toml("").unwrap();
        cfg.network.rpc_url = "https://rpc.example.org/v1/secret-key".into();
        let shown = format!("{:?}", cfg.network);
        assert!(shown.contains("rpc.example.org"));
        assert!(!shown.contains("secret-key"));
    }
}
