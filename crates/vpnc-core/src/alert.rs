//! Уведомления пользователю и причины отсутствия сервера

use std::fmt;

use crate::server::ServerType;

/// Почему не удалось подобрать сервер
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnavailableReason {
    /// Нужен tier не ниже указанного
    Upgrade(i32),
    /// Все кандидаты на обслуживании
    Maintenance,
    /// Все адреса уже заняты сессиями аккаунта
    ExistingConnection,
}

impl fmt::Display for ResolutionUnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionUnavailableReason::Upgrade(tier) => write!(f, "требуется tier {}", tier),
            ResolutionUnavailableReason::Maintenance => write!(f, "серверы на обслуживании"),
            ResolutionUnavailableReason::ExistingConnection => write!(f, "уже есть подключение"),
        }
    }
}

/// Уведомление для пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    /// Первое подключение: системе может понадобиться разрешение
    FirstTimeConnecting,
    /// Учётные данные VPN недоступны
    CannotAccessVpnCredentials,
    /// Аккаунт заблокирован из-за неоплаты
    Delinquent,
    /// Исчерпан лимит одновременных сессий
    MaxSessions {
        /// Лимит сессий аккаунта
        max_connect: u32,
    },
    /// Туннель завис и не восстановился
    VpnStuck,
    /// Подходящий сервер не найден
    ResolutionUnavailable {
        /// Запрос относился к конкретной стране
        for_specific_country: bool,
        /// Тип сервера запроса
        server_type: ServerType,
        /// Причина
        reason: ResolutionUnavailableReason,
    },
}
