//! # VPNC Core (vpnc-core)
//!
//! Модель данных ядра VPN клиента.
//!
//! ## Структура
//!
//! - [`server`]: Серверы, их адреса и каталог по странам
//! - [`request`]: Запрос подключения и его версионированная сериализация
//! - [`state`]: Состояния приложения и системного туннеля
//! - [`protocol`]: Протоколы туннеля
//! - [`services`]: Трейты внешних зависимостей (туннель, API, хранилище, уведомления)
//! - [`error`]: Типы ошибок

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod configuration;
pub mod credentials;
pub mod error;
pub mod profile;
pub mod protocol;
pub mod request;
pub mod server;
pub mod services;
pub mod session;
pub mod state;

// Re-экспорт основных типов для удобства
pub use alert::{AlertKind, ResolutionUnavailableReason};
pub use configuration::ConnectionConfiguration;
pub use credentials::VpnCredentials;
pub use error::{ApiError, KeychainError, RequestError, Result, TunnelError, VpnError};
pub use profile::{Profile, ServerOffering};
pub use protocol::{ConnectionProtocol, NetShieldType, OpenVpnTransport, VpnProtocol};
pub use request::{ConnectionRequest, ConnectionRequestType, CountryConnectionRequestType};
pub use server::{
    ContinuousServerProperties, CountryGroup, ServerCatalog, ServerFeature, ServerIp, ServerModel, ServerType,
};
pub use services::{AccountApi, AlertSink, SecretStore, TunnelManager};
pub use session::VpnSession;
pub use state::{AppState, ConnectionDescriptor, ConnectionStatus, FailureCause, TunnelState};

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
