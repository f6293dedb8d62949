//! Активные сессии аккаунта, о которых сообщает удалённый API

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::protocol::VpnProtocol;

/// Удалённая запись об уже установленном туннеле
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnSession {
    /// Идентификатор сессии
    pub session_id: String,
    /// Адрес выхода, к которому подключена сессия
    pub exit_ip: IpAddr,
    /// Протокол сессии
    pub vpn_protocol: VpnProtocol,
}
