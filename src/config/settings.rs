use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub store: StoreSettings,
    pub ingest: IngestSettings,
    pub estimator: EstimatorSettings,
    pub log: LogSettings,
}

/// Where the broker listens and how large a frame it accepts.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MqttSettings {
    pub bind_address: String,
    pub max_packet_size: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreSettings {
    pub path: String,
    /// Cap on stored readings; the oldest are trimmed first.
    pub max_readings: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IngestSettings {
    pub store_timeout_ms: u64,
    /// Characters of a rejected payload kept in the error record.
    pub max_error_payload: usize,
}

/// Path-loss constants and the periodic location feed.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EstimatorSettings {
    pub tx_power: f64,
    pub path_loss_exponent: f64,
    pub tag_id: Option<String>,
    /// 0 disables the location publisher.
    pub publish_interval_secs: u64,
    pub location_topic: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; `Settings::from_partial` fills the gaps from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub mqtt: Option<PartialMqttSettings>,
    pub store: Option<PartialStoreSettings>,
    pub ingest: Option<PartialIngestSettings>,
    pub estimator: Option<PartialEstimatorSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMqttSettings {
    pub bind_address: Option<String>,
    pub max_packet_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStoreSettings {
    pub path: Option<String>,
    pub max_readings: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialIngestSettings {
    pub store_timeout_ms: Option<u64>,
    pub max_error_payload: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialEstimatorSettings {
    pub tx_power: Option<f64>,
    pub path_loss_exponent: Option<f64>,
    pub tag_id: Option<String>,
    pub publish_interval_secs: Option<u64>,
    pub location_topic: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Settings {
    /// Merge loaded values onto the defaults.
    pub fn from_partial(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let mqtt = partial.mqtt.unwrap_or_default();
        let store = partial.store.unwrap_or_default();
        let ingest = partial.ingest.unwrap_or_default();
        let estimator = partial.estimator.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            mqtt: MqttSettings {
                bind_address: mqtt.bind_address.unwrap_or(default.mqtt.bind_address),
                max_packet_size: mqtt.max_packet_size.unwrap_or(default.mqtt.max_packet_size),
            },
            store: StoreSettings {
                path: store.path.unwrap_or(default.store.path),
                max_readings: store.max_readings.or(default.store.max_readings),
            },
            ingest: IngestSettings {
                store_timeout_ms: ingest
                    .store_timeout_ms
                    .unwrap_or(default.ingest.store_timeout_ms),
                max_error_payload: ingest
                    .max_error_payload
                    .unwrap_or(default.ingest.max_error_payload),
            },
            estimator: EstimatorSettings {
                tx_power: estimator.tx_power.unwrap_or(default.estimator.tx_power),
                path_loss_exponent: estimator
                    .path_loss_exponent
                    .unwrap_or(default.estimator.path_loss_exponent),
                tag_id: estimator
                    .tag_id
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .or(default.estimator.tag_id),
                publish_interval_secs: estimator
                    .publish_interval_secs
                    .unwrap_or(default.estimator.publish_interval_secs),
                location_topic: estimator
                    .location_topic
                    .unwrap_or(default.estimator.location_topic),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings {
                bind_address: "0.0.0.0:1883".to_string(),
                max_packet_size: 1024 * 1024,
            },
            store: StoreSettings {
                path: "data/catlocator.db".to_string(),
                max_readings: None,
            },
            ingest: IngestSettings {
                store_timeout_ms: 2000,
                max_error_payload: 4096,
            },
            estimator: EstimatorSettings {
                tx_power: -59.0,
                path_loss_exponent: 2.0,
                tag_id: None,
                publish_interval_secs: 5,
                location_topic: "catlocator/location".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
