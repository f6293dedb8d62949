//! Ошибки построения проверок доступности
//!
//! Сами проверки никогда не возвращают ошибок: сбой сети, тайм-аут
//! и отказ в соединении дают `false`. Ошибки возникают только
//! при разборе параметров транспорта.

use thiserror::Error;

/// Ошибки модуля проверки протоколов
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Статический ключ OpenVPN не является hex строкой
    #[error("Некорректный статический ключ OpenVPN: {0}")]
    InvalidStaticKey(String),

    /// Статический ключ слишком короткий для HMAC-SHA512
    #[error("Статический ключ слишком короткий: требуется минимум {required} байт, получено {actual}")]
    StaticKeyTooShort { required: usize, actual: usize },
}

/// Псевдоним для Result с ошибкой проверки
pub type Result<T> = std::result::Result<T, ProbeError>;
