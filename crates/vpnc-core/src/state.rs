//! Состояния подключения
//!
//! [`TunnelState`] приходит от системного туннеля и бывает шумным;
//! [`AppState`] - то, что видит приложение. Переводом одного в другое
//! занимается машина состояний клиента.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::protocol::VpnProtocol;

/// Описание туннеля, к которому относится состояние
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Адрес входа
    pub server_ip: IpAddr,
    /// Протокол туннеля
    pub protocol: VpnProtocol,
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} через {}", self.server_ip, self.protocol)
    }
}

/// Причина перехода в [`AppState::Error`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Не удалось прочитать учётные данные
    CredentialsUnavailable,
    /// Аккаунт заблокирован из-за неоплаты
    Delinquent,
    /// Исчерпан лимит одновременных сессий
    SessionLimit,
    /// Туннель завис в отключении
    Stuck,
    /// Ошибка, сообщённая туннелем
    Tunnel(String),
    /// Не удалось активировать туннель
    ConnectionFailed,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::CredentialsUnavailable => write!(f, "учётные данные недоступны"),
            FailureCause::Delinquent => write!(f, "аккаунт заблокирован"),
            FailureCause::SessionLimit => write!(f, "лимит сессий"),
            FailureCause::Stuck => write!(f, "туннель завис"),
            FailureCause::Tunnel(reason) => write!(f, "ошибка туннеля: {}", reason),
            FailureCause::ConnectionFailed => write!(f, "не удалось подключиться"),
        }
    }
}

/// Состояние подключения с точки зрения приложения
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppState {
    /// Отключено
    #[default]
    Disconnected,
    /// Идёт выбор сервера и подготовка конфигурации
    PreparingConnection,
    /// Туннель устанавливается
    Connecting(ConnectionDescriptor),
    /// Туннель установлен
    Connected(ConnectionDescriptor),
    /// Туннель разрывается
    Disconnecting(ConnectionDescriptor),
    /// Попытка завершилась ошибкой
    Error(FailureCause),
    /// Попытка прервана пользователем или по тайм-ауту
    Aborted {
        /// Прервано пользователем
        user_initiated: bool,
    },
}

impl AppState {
    /// Туннель установлен
    pub fn is_connected(&self) -> bool {
        matches!(self, AppState::Connected(_))
    }

    /// Туннель не работает и не разрывается
    pub fn is_disconnected(&self) -> bool {
        match self {
            AppState::Disconnected
            | AppState::PreparingConnection
            | AppState::Connecting(_)
            | AppState::Error(_)
            | AppState::Aborted { .. } => true,
            AppState::Connected(_) | AppState::Disconnecting(_) => false,
        }
    }

    /// Идёт попытка подключения
    pub fn is_connecting(&self) -> bool {
        matches!(self, AppState::PreparingConnection | AppState::Connecting(_))
    }

    /// Описание туннеля для состояний, которые его несут
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        match self {
            AppState::Connecting(d) | AppState::Connected(d) | AppState::Disconnecting(d) => Some(d),
            AppState::Disconnected
            | AppState::PreparingConnection
            | AppState::Error(_)
            | AppState::Aborted { .. } => None,
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Disconnected => write!(f, "отключено"),
            AppState::PreparingConnection => write!(f, "подготовка подключения"),
            AppState::Connecting(d) => write!(f, "подключение ({})", d),
            AppState::Connected(d) => write!(f, "подключено ({})", d),
            AppState::Disconnecting(d) => write!(f, "отключение ({})", d),
            AppState::Error(cause) => write!(f, "ошибка ({})", cause),
            AppState::Aborted { user_initiated } => {
                write!(f, "прервано ({})", if *user_initiated { "пользователем" } else { "тайм-аут" })
            }
        }
    }
}

/// Низкоуровневое состояние системного туннеля
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TunnelState {
    /// Конфигурация не загружена
    #[default]
    Invalid,
    /// Отключено
    Disconnected,
    /// Подключение
    Connecting(ConnectionDescriptor),
    /// Подключено
    Connected(ConnectionDescriptor),
    /// Восстановление после смены сети
    Reasserting,
    /// Отключение
    Disconnecting(ConnectionDescriptor),
    /// Ошибка туннеля
    Error(String),
}

impl TunnelState {
    /// Туннель поднят или в процессе разрыва
    pub fn is_active(&self) -> bool {
        matches!(self, TunnelState::Connected(_) | TunnelState::Disconnecting(_))
    }
}

/// Упрощённое состояние для отображения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Отключено
    Disconnected,
    /// Подключение
    Connecting,
    /// Подключено
    Connected,
    /// Отключение
    Disconnecting,
}

impl ConnectionStatus {
    /// Свернуть [`AppState`] в отображаемое состояние
    pub fn for_app_state(state: &AppState) -> Self {
        match state {
            AppState::Disconnected | AppState::Aborted { .. } | AppState::Error(_) => {
                ConnectionStatus::Disconnected
            }
            AppState::PreparingConnection | AppState::Connecting(_) => ConnectionStatus::Connecting,
            AppState::Connected(_) => ConnectionStatus::Connected,
            AppState::Disconnecting(_) => ConnectionStatus::Disconnecting,
        }
    }
}
