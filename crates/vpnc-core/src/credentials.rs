//! Учётные данные VPN аккаунта
//!
//! Пароль зануляется при удалении структуры.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Значение `delinquent`, начиная с которого аккаунт считается должником
const DELINQUENT_THRESHOLD: u32 = 2;

/// Учётные данные VPN
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct VpnCredentials {
    /// Имя пользователя для туннеля
    pub username: String,
    /// Пароль для туннеля
    pub password: String,
    /// Максимальный доступный tier
    pub max_tier: i32,
    /// Максимальное число одновременных сессий
    pub max_connect: u32,
    /// Статус задолженности по оплате
    #[serde(default)]
    pub delinquent: u32,
}

impl VpnCredentials {
    /// Аккаунт заблокирован из-за неоплаты
    pub fn is_delinquent(&self) -> bool {
        self.delinquent > DELINQUENT_THRESHOLD
    }
}

impl fmt::Debug for VpnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpnCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("max_tier", &self.max_tier)
            .field("max_connect", &self.max_connect)
            .field("delinquent", &self.delinquent)
            .finish()
    }
}
