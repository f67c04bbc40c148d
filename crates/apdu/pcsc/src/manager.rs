//! Device manager for PC/SC operations

use pcsc::{Context, Scope};
use tracing::debug;

use crate::config::{ConnectStrategy, PcscConfig};
use crate::error::PcscError;
use crate::reader::PcscReader;
use crate::transport::PcscTransport;
use crate::util::match_atr;

/// Manager for PC/SC device operations
#[allow(missing_debug_implementations)]
pub struct PcscDeviceManager {
    /// PC/SC context
    context: Context,
}

impl PcscDeviceManager {
    /// Establish a user-scope PC/SC context
    pub fn new() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers along with the card in each
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let names = match self.context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => return Err(PcscError::NoReadersAvailable),
            Err(e) => return Err(e.into()),
        };
        if names.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut states: Vec<_> = names
            .iter()
            .map(|name| pcsc::ReaderState::new(name.as_c_str(), pcsc::State::UNAWARE))
            .collect();

        match self.context.get_status_change(None, &mut states) {
            Ok(()) => Ok(states.iter().map(PcscReader::from_reader_state).collect()),
            Err(e) => {
                debug!(error = %e, "Reader status unavailable, assuming no cards");
                Ok(names
                    .iter()
                    .map(|name| PcscReader::new(name.to_string_lossy().into_owned(), None))
                    .collect())
            }
        }
    }

    /// Open a connection to a specific reader
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        self.open_reader_with_config(reader_name, PcscConfig::default())
    }

    /// Open a connection to a specific reader with custom configuration
    pub fn open_reader_with_config(
        &self,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        PcscTransport::new(self.context.clone(), reader_name, config)
    }

    /// Connect to a reader using the specified strategy
    pub fn connect_strategy(
        &self,
        strategy: ConnectStrategy,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        match strategy {
            ConnectStrategy::Reader(name) => self.open_reader_with_config(&name, config),
            ConnectStrategy::AnyCard => {
                let reader = self
                    .list_readers()?
                    .into_iter()
                    .find(PcscReader::has_card)
                    .ok_or_else(|| PcscError::NoCard("No reader with card found".to_string()))?;
                self.open_reader_with_config(reader.name(), config)
            }
            ConnectStrategy::CardWithAtr(pattern, mask) => {
                let reader = self
                    .list_readers()?
                    .into_iter()
                    .find(|reader| {
                        reader
                            .atr()
                            .is_some_and(|atr| match_atr(atr, &pattern, mask.as_deref()))
                    })
                    .ok_or_else(|| {
                        PcscError::NoCard("No card with matching ATR found".to_string())
                    })?;
                self.open_reader_with_config(reader.name(), config)
            }
        }
    }
}
