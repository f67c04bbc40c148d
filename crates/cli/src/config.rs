use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{OptionExt, WrapErr};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use simrelay_apdu_core::{CardTransport, OutgoingInstructions, StatusWord};
use simrelay_apdu_transport_pcsc::{ConnectStrategy, PcscConfig, PcscDeviceManager, ShareMode};
use simrelay_mitm::{
    BufferedSink, DiagnosticSink, EmulatedCard, GsmtapConfig, GsmtapSink, NullSink, PatternRule,
    PatternTable, RelayConfig, UsbHandsetConfig,
};
use tracing::info;

/// Environment variables with this prefix override the file
const ENV_PREFIX: &str = "SIMRELAY_";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub handset: HandsetConfig,
    pub relay: RelaySection,
    pub backend: BackendConfig,
    pub gsmtap: GsmtapSection,
    pub intercept: Vec<InterceptEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HandsetConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub interrupt_endpoint: u8,
    pub read_endpoint: u8,
    pub write_endpoint: u8,
    pub write_timeout_ms: u64,
}

impl Default for HandsetConfig {
    fn default() -> Self {
        let usb = UsbHandsetConfig::default();
        Self {
            vendor_id: usb.vendor_id,
            product_id: usb.product_id,
            interface: usb.interface,
            interrupt_endpoint: usb.interrupt_endpoint,
            read_endpoint: usb.read_endpoint,
            write_endpoint: usb.write_endpoint,
            write_timeout_ms: usb.write_timeout.as_millis() as u64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RelaySection {
    pub poll_timeout_ms: u64,
    pub reset_card: bool,
    /// Instructions whose data flows from the card to the handset
    pub outgoing: Vec<u8>,
}

impl Default for RelaySection {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            poll_timeout_ms: relay.poll_timeout.as_millis() as u64,
            reset_card: relay.reset_card_on_handset_reset,
            outgoing: relay.outgoing.iter().collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Pcsc,
    Emulator,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Reader to open; the first reader with a card otherwise
    pub reader: Option<String>,
    /// Open the reader whose card ATR matches, hex
    pub atr: Option<String>,
    /// Mask applied to `atr` before matching, hex
    pub atr_mask: Option<String>,
    /// Share the card with other applications
    pub shared: bool,
    pub emulator: EmulatorConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    pub atr: Option<String>,
    pub default_status: Option<String>,
    pub responses: Vec<CannedResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CannedResponse {
    pub command: String,
    pub response: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GsmtapSection {
    pub enabled: bool,
    pub destination: SocketAddr,
}

impl Default for GsmtapSection {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: GsmtapConfig::default().destination,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InterceptEntry {
    pub tag: String,
    #[serde(rename = "match")]
    pub pattern: String,
    pub replace: String,
}

/// Returns the default config file, `$HOME/.simrelay/simrelay.toml`
pub fn default_config_path() -> eyre::Result<PathBuf> {
    Ok(std::env::home_dir()
        .ok_or_eyre("home directory not found")?
        .join(".simrelay")
        .join("simrelay.toml"))
}

/// The file (if it exists) overlaid with `SIMRELAY_` environment variables
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    figment(&path)
        .extract()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))
}

impl Config {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::default()
            .with_poll_timeout(Duration::from_millis(self.relay.poll_timeout_ms))
            .with_card_reset(self.relay.reset_card)
            .with_outgoing(OutgoingInstructions::from_instructions(&self.relay.outgoing))
    }

    pub fn usb_config(&self) -> UsbHandsetConfig {
        let handset = &self.handset;
        UsbHandsetConfig::default()
            .with_ids(handset.vendor_id, handset.product_id)
            .with_interface(handset.interface)
            .with_endpoints(
                handset.interrupt_endpoint,
                handset.read_endpoint,
                handset.write_endpoint,
            )
            .with_write_timeout(Duration::from_millis(handset.write_timeout_ms))
    }

    pub fn pattern_table(&self) -> eyre::Result<PatternTable> {
        self.intercept
            .iter()
            .map(|entry| -> eyre::Result<PatternRule> {
                let tag = entry.tag.parse()?;
                Ok(PatternRule::from_hex(tag, &entry.pattern, &entry.replace)?)
            })
            .collect()
    }

    /// The diagnostic sink; GSMTAP capture runs on its own thread
    pub fn sink(&self) -> eyre::Result<Box<dyn DiagnosticSink>> {
        if !self.gsmtap.enabled {
            return Ok(Box::new(NullSink));
        }
        let config = GsmtapConfig::default().with_destination(self.gsmtap.destination);
        let gsmtap = GsmtapSink::new(config)?;
        info!(destination = %self.gsmtap.destination, "Mirroring captures as GSMTAP");
        Ok(Box::new(BufferedSink::new(gsmtap, BufferedSink::DEFAULT_CAPACITY)?))
    }

    pub fn emulated_card(&self) -> eyre::Result<EmulatedCard> {
        let emulator = &self.backend.emulator;
        let mut card = match &emulator.atr {
            Some(atr) => EmulatedCard::new(decode("emulator ATR", atr)?),
            None => EmulatedCard::default(),
        };
        if let Some(status) = &emulator.default_status {
            let [sw1, sw2] = <[u8; 2]>::try_from(decode("default status", status)?)
                .map_err(|_| eyre::eyre!("default status must be two bytes"))?;
            card = card.with_default_status(StatusWord::new(sw1, sw2));
        }
        for canned in &emulator.responses {
            card = card.with_response(
                decode("canned command", &canned.command)?,
                decode("canned response", &canned.response)?,
            );
        }
        Ok(card)
    }

    pub fn connect_strategy(&self) -> eyre::Result<ConnectStrategy> {
        let backend = &self.backend;
        Ok(match (&backend.reader, &backend.atr) {
            (Some(reader), _) => ConnectStrategy::Reader(reader.clone()),
            (None, Some(atr)) => {
                let mask = backend
                    .atr_mask
                    .as_deref()
                    .map(|mask| decode("ATR mask", mask))
                    .transpose()?;
                ConnectStrategy::CardWithAtr(decode("ATR", atr)?, mask)
            }
            (None, None) => ConnectStrategy::AnyCard,
        })
    }

    /// Open the configured card backend
    pub fn connect_backend(&self) -> eyre::Result<Box<dyn CardTransport>> {
        match self.backend.kind {
            BackendKind::Emulator => {
                info!("Using the emulated card");
                Ok(Box::new(self.emulated_card()?))
            }
            BackendKind::Pcsc => {
                let share_mode = if self.backend.shared {
                    ShareMode::Shared
                } else {
                    ShareMode::Exclusive
                };
                let strategy = self.connect_strategy()?;
                info!(?strategy, "Connecting to card");
                let manager = PcscDeviceManager::new()?;
                let transport = manager.connect_strategy(
                    strategy,
                    PcscConfig::default().with_share_mode(share_mode),
                )?;
                Ok(Box::new(transport))
            }
        }
    }
}

fn decode(what: &str, value: &str) -> eyre::Result<Vec<u8>> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(compact).wrap_err_with(|| format!("{what} is not valid hex: {value}"))
}
