//! VPN протоколы и транспорты
//!
//! [`VpnProtocol`] описывает конкретный транспорт туннеля,
//! [`ConnectionProtocol`] - то, что запросил пользователь: конкретный
//! протокол или автоматический выбор (Smart Protocol).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Транспорт OpenVPN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenVpnTransport {
    /// UDP
    Udp,
    /// TCP
    Tcp,
}

/// Протокол туннеля
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VpnProtocol {
    /// IKEv2/IPsec
    Ike,
    /// OpenVPN поверх UDP или TCP
    OpenVpn(OpenVpnTransport),
}

impl VpnProtocol {
    /// Все транспорты в порядке приоритета Smart Protocol
    pub const BY_PRIORITY: [VpnProtocol; 3] = [
        VpnProtocol::Ike,
        VpnProtocol::OpenVpn(OpenVpnTransport::Udp),
        VpnProtocol::OpenVpn(OpenVpnTransport::Tcp),
    ];

    /// Приоритет при автоматическом выборе (меньше - лучше)
    pub fn priority(&self) -> u8 {
        match self {
            VpnProtocol::Ike => 0,
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => 1,
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => 2,
        }
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::Ike => write!(f, "IKEv2"),
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => write!(f, "OpenVPN (UDP)"),
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => write!(f, "OpenVPN (TCP)"),
        }
    }
}

/// Протокол, запрошенный пользователем
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionProtocol {
    /// Автоматический выбор по результатам проверки портов
    SmartProtocol,
    /// Фиксированный протокол
    VpnProtocol(VpnProtocol),
}

impl ConnectionProtocol {
    /// Фиксированный протокол, если он задан
    pub fn vpn_protocol(&self) -> Option<VpnProtocol> {
        match self {
            ConnectionProtocol::SmartProtocol => None,
            ConnectionProtocol::VpnProtocol(protocol) => Some(*protocol),
        }
    }

    /// Может ли подключение в итоге пойти через IKEv2
    pub fn may_use_ike(&self) -> bool {
        match self {
            ConnectionProtocol::SmartProtocol => true,
            ConnectionProtocol::VpnProtocol(protocol) => *protocol == VpnProtocol::Ike,
        }
    }
}

impl fmt::Display for ConnectionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionProtocol::SmartProtocol => write!(f, "Smart"),
            ConnectionProtocol::VpnProtocol(protocol) => protocol.fmt(f),
        }
    }
}

/// Уровень фильтрации NetShield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetShieldType {
    /// Выключен
    #[default]
    Off,
    /// Блокировка вредоносных доменов
    Level1,
    /// Блокировка вредоносных доменов, рекламы и трекеров
    Level2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut protocols = VpnProtocol::BY_PRIORITY;
        protocols.reverse();
        protocols.sort_by_key(|p| p.priority());
        assert_eq!(protocols, VpnProtocol::BY_PRIORITY);
    }

    #[test]
    fn test_may_use_ike() {
        assert!(ConnectionProtocol::SmartProtocol.may_use_ike());
        assert!(ConnectionProtocol::VpnProtocol(VpnProtocol::Ike).may_use_ike());
        assert!(!ConnectionProtocol::VpnProtocol(VpnProtocol::OpenVpn(OpenVpnTransport::Tcp)).may_use_ike());
    }
}
