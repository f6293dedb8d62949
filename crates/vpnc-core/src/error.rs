//! Типы ошибок ядра VPN клиента
//!
//! Ошибки сгруппированы по источнику: удалённый API аккаунта, хранилище
//! секретов, системный туннель и формат запроса подключения.
//!
//! "Нет подходящего сервера" ошибкой не является и передаётся значением,
//! см. [`crate::alert::ResolutionUnavailableReason`].

use thiserror::Error;

/// Основной тип ошибок ядра
#[derive(Error, Debug)]
pub enum VpnError {
    /// Ошибка удалённого API аккаунта
    #[error("Ошибка API: {0}")]
    Api(#[from] ApiError),

    /// Ошибка хранилища секретов
    #[error("Ошибка хранилища секретов: {0}")]
    Keychain(#[from] KeychainError),

    /// Ошибка системного туннеля
    #[error("Ошибка туннеля: {0}")]
    Tunnel(#[from] TunnelError),

    /// Некорректный запрос подключения
    #[error("Ошибка запроса подключения: {0}")]
    Request(#[from] RequestError),

    /// Ошибка ввода-вывода
    #[error("Ошибка I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Общая ошибка
    #[error("Общая ошибка: {0}")]
    Other(String),
}

/// Ошибки удалённого API аккаунта
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Превышено время ожидания ответа
    #[error("Тайм-аут запроса к API")]
    Timeout,

    /// Сеть недоступна или соединение потеряно
    #[error("Сетевая ошибка: {0}")]
    Network(String),

    /// Сессия пользователя недействительна
    #[error("Требуется повторная авторизация")]
    Unauthorized,

    /// Сервер вернул ошибку
    #[error("Ошибка сервера {code}: {message}")]
    Server { code: u16, message: String },
}

impl ApiError {
    /// Временная ошибка, которую имеет смысл повторить
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Network(_))
    }
}

/// Ошибки хранилища секретов
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeychainError {
    /// Учётные данные отсутствуют
    #[error("Учётные данные VPN не найдены")]
    NotFound,

    /// Хранилище недоступно
    #[error("Хранилище недоступно: {0}")]
    Unavailable(String),
}

/// Ошибки системного туннеля
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// Не удалось загрузить конфигурацию туннеля
    #[error("Не удалось загрузить конфигурацию туннеля: {0}")]
    LoadFailed(String),

    /// Не удалось активировать туннель
    #[error("Не удалось активировать туннель: {0}")]
    ActivationFailed(String),

    /// Не удалось удалить конфигурации туннеля
    #[error("Не удалось удалить конфигурации туннеля: {0}")]
    RemovalFailed(String),
}

/// Ошибки запроса подключения
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Неизвестная версия схемы
    #[error("Неподдерживаемая версия схемы запроса: {0}")]
    UnsupportedVersion(u32),

    /// Пустой код страны
    #[error("Код страны не может быть пустым")]
    EmptyCountryCode,

    /// Документ не разобран
    #[error("Некорректный документ запроса: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        RequestError::Malformed(e.to_string())
    }
}

/// Псевдоним для Result с ошибкой ядра
pub type Result<T> = std::result::Result<T, VpnError>;

impl From<&str> for VpnError {
    fn from(s: &str) -> Self {
        VpnError::Other(s.to_string())
    }
}

impl From<String> for VpnError {
    fn from(s: String) -> Self {
        VpnError::Other(s)
    }
}
