use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Coalition, Modulation, Radio};

/// Protocol version advertised in outgoing data-plane messages, matching
/// what prevailing SRS clients send.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.1.0.2";

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientOptions {
    /// "host:port" of the SRS server, used for both TCP and UDP.
    pub address: String,
    /// Name shown in the SRS client list and the in-game overlay.
    pub client_name: String,
    /// Coalition-authorization secret sent after the initial sync.
    pub external_awacs_mode_password: String,
    pub coalition: Coalition,
    /// Suppresses outbound voice while preserving half-duplex behavior.
    pub mute: bool,
    pub protocol_version: String,
    /// Radios to receive and transmit on. Kept last so the TOML rendering
    /// puts the radio tables after the scalar options.
    pub radios: Vec<Radio>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "localhost:5002".to_owned(),
            client_name: "External AWACS".to_owned(),
            external_awacs_mode_password: String::new(),
            coalition: Coalition::Blue,
            mute: false,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            radios: vec![Radio {
                frequency: 251_000_000.0,
                modulation: Modulation::Am,
                ..Default::default()
            }],
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let port = self
            .address
            .rsplit_once(':')
            .map(|(host, port)| (host, port.parse::<u16>()));
        match port {
            Some((host, Ok(_))) if !host.is_empty() => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "address {:?} is not host:port",
                    self.address
                )))
            }
        }

        if self.client_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "client name cannot be empty".to_string(),
            ));
        }

        if self.radios.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one radio is required".to_string(),
            ));
        }
        for radio in &self.radios {
            if !radio.is_tuned() {
                return Err(ConfigError::ValidationError(format!(
                    "radio frequency {} Hz is below the 8 MHz floor",
                    radio.frequency
                )));
            }
            if radio.modulation == Modulation::Disabled {
                return Err(ConfigError::ValidationError(
                    "radio modulation cannot be disabled".to_string(),
                ));
            }
        }

        if self.protocol_version.is_empty() {
            return Err(ConfigError::ValidationError(
                "protocol version cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_config_file(&self, filename: &str) -> Result<(), ConfigError> {
        self.validate()?;
        let config_str = toml::to_string(self)?;
        std::fs::write(filename, config_str)?;
        Ok(())
    }

    pub fn from_config_file(filename: &str) -> Result<Self, ConfigError> {
        if !std::path::Path::new(filename).exists() {
            Self::default().to_config_file(filename)?;
        }
        let config_str = std::fs::read_to_string(filename)?;
        let config: Self = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ClientOptions::default().validate().is_ok());
    }

    #[test]
    fn bad_address_is_rejected() {
        let mut options = ClientOptions::default();
        options.address = "no-port".to_owned();
        assert!(options.validate().is_err());

        options.address = ":5002".to_owned();
        assert!(options.validate().is_err());
    }

    #[test]
    fn untuned_radio_is_rejected() {
        let mut options = ClientOptions::default();
        options.radios[0].frequency = 1_000_000.0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn empty_radios_are_rejected() {
        let mut options = ClientOptions::default();
        options.radios.clear();
        assert!(options.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_options() {
        let options = ClientOptions::default();
        let text = toml::to_string(&options).expect("serialize");
        let back: ClientOptions = toml::from_str(&text).expect("parse");
        assert_eq!(back.address, options.address);
        assert_eq!(back.radios, options.radios);
        assert_eq!(back.protocol_version, DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let options: ClientOptions =
            toml::from_str("address = \"srs.example.com:5002\"").expect("parse");
        assert_eq!(options.address, "srs.example.com:5002");
        assert_eq!(options.protocol_version, DEFAULT_PROTOCOL_VERSION);
        assert!(!options.mute);
    }
}
