//! # VPNC Client (vpnc-client)
//!
//! Оркестрация подключения VPN клиента.
//!
//! Предоставляет:
//! - Выбор сервера по запросу подключения ([`selector`])
//! - Подготовку конфигурации туннеля ([`preparer`])
//! - Машину состояний подключения ([`state_manager`])
//! - Фасад намерений пользователя ([`gateway`])
//! - Конфигурацию и сохраняемые настройки ([`config`], [`properties`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod gateway;
pub mod preparer;
pub mod properties;
pub mod selector;
pub mod state_manager;
pub mod tier_checker;

#[cfg(test)]
mod testing;

// Re-экспорт основных типов
pub use config::ClientConfig;
pub use gateway::{GatewayDeps, GatewaySettings, VpnGateway};
pub use preparer::{PreparationOutcome, PreparedConnection, VpnConnectionPreparer};
pub use properties::{PropertiesManager, StoredProperties};
pub use selector::{SelectionContext, SelectionOutcome, ServerSelector};
pub use state_manager::{AppStateManager, AttemptId, StateManagerConfig, StateManagerDeps, StateSnapshot};
pub use tier_checker::ServerTierChecker;

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
