//! Готовая к активации конфигурация туннеля

use crate::credentials::VpnCredentials;
use crate::protocol::{NetShieldType, VpnProtocol};
use crate::server::{ServerIp, ServerModel};
use crate::state::ConnectionDescriptor;

/// Результат работы подготовителя подключения
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfiguration {
    /// Выбранный сервер
    pub server: ServerModel,
    /// Выбранный адрес сервера
    pub server_ip: ServerIp,
    /// Протокол туннеля
    pub vpn_protocol: VpnProtocol,
    /// Уровень NetShield
    pub net_shield_type: NetShieldType,
    /// Порты в порядке попыток
    pub ports: Vec<u16>,
    /// Учётные данные туннеля
    pub credentials: VpnCredentials,
}

impl ConnectionConfiguration {
    /// Описание туннеля, который будет поднят с этой конфигурацией
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            server_ip: self.server_ip.entry_ip,
            protocol: self.vpn_protocol,
        }
    }
}
