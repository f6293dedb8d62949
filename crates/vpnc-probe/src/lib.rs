//! # VPNC Probe (vpnc-probe)
//!
//! Проверка доступности транспортов VPN и автоматический выбор протокола.
//!
//! ## Возможности
//!
//! - Пакеты рукопожатия OpenVPN (tls-auth, HMAC-SHA512) и IKEv2 (`IKE_SA_INIT`)
//! - Проверка портов с тайм-аутом и однократным завершением
//! - Параллельная проверка всех транспортов и выбор по приоритету
//!
//! ## Пример использования
//!
//! ```rust,no_run
//! use vpnc_probe::{ProbeConfig, SmartProtocol, SmartProtocolConfig, SmartProtocolSelector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let selector = SmartProtocolSelector::from_config(&ProbeConfig::default(), SmartProtocolConfig::default())?;
//! let (protocol, ports) = selector.determine_best_protocol("192.0.2.1".parse()?).await;
//! println!("{} {:?}", protocol, ports);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checker;
pub mod config;
pub mod error;
pub mod handshake;
pub mod smart;

// Re-экспорт основных типов
pub use checker::{AvailabilityChecker, IkeChecker, OpenVpnChecker, ProbeRegistry, ProtocolProbeResult};
pub use config::{ProbeConfig, SmartProtocolConfig, DEFAULT_PROBE_TIMEOUT};
pub use error::{ProbeError, Result};
pub use smart::{SmartProtocol, SmartProtocolSelector};
