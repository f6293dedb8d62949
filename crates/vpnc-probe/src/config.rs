//! Параметры проверки портов

use std::time::Duration;
use vpnc_core::protocol::{OpenVpnTransport, VpnProtocol};

/// Тайм-аут проверки одного порта по умолчанию
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Статический ключ tls-auth по умолчанию (формат файла OpenVPN)
pub const DEFAULT_STATIC_KEY: &str = "\
-----BEGIN OpenVPN Static key V1-----
a74bef54590642f11dab4e213ff65159
40dce352eef575c337e4c7c2b68861a6
34c83efab7eed6f0dd46a038be98e6ad
a3db3750f38bb9634004b46555ca6da2
c2e96873ec597aed803e2dc4fd01eff8
54d7dd9383999776c5703404c1cb316a
a4f570f8f1448c6c2b7c0327f06b8e06
0cfd7a5579f34759d52b4ff344af0fd1
20b50d878cdd629362d6073c40d66eb9
9fa2fbf1649de57285c4b5afe7abb6eb
f802ff07cf00c78dd1fd470b0b64028c
e33265d0d43e1058d2f728da1bed10a5
20e1325d8d6962424a7b62064c6d97c2
c105779a02ffee7f9059d08bef82caad
5df496be2ba098378f4957e7a17fa364
bb1653c10c3235707c399c5ac273182d
-----END OpenVPN Static key V1-----";

/// Какие транспорты участвуют в автоматическом выборе
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartProtocolConfig {
    /// IKEv2
    pub ikev2: bool,
    /// OpenVPN поверх UDP
    pub openvpn_udp: bool,
    /// OpenVPN поверх TCP
    pub openvpn_tcp: bool,
}

impl Default for SmartProtocolConfig {
    fn default() -> Self {
        Self {
            ikev2: true,
            openvpn_udp: true,
            openvpn_tcp: true,
        }
    }
}

impl SmartProtocolConfig {
    /// Участвует ли протокол в проверке
    pub fn is_enabled(&self, protocol: VpnProtocol) -> bool {
        match protocol {
            VpnProtocol::Ike => self.ikev2,
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => self.openvpn_udp,
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => self.openvpn_tcp,
        }
    }
}

/// Порты и ключи транспортов
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Тайм-аут проверки одного порта
    pub timeout: Duration,
    /// Порты IKEv2
    pub ike_ports: Vec<u16>,
    /// Порты OpenVPN UDP
    pub openvpn_udp_ports: Vec<u16>,
    /// Порты OpenVPN TCP
    pub openvpn_tcp_ports: Vec<u16>,
    /// Статический ключ tls-auth OpenVPN
    pub openvpn_static_key: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            ike_ports: vec![500, 4500],
            openvpn_udp_ports: vec![443, 1194, 4569, 5060, 80],
            openvpn_tcp_ports: vec![443, 3389, 8080, 8443],
            openvpn_static_key: DEFAULT_STATIC_KEY.to_string(),
        }
    }
}

impl ProbeConfig {
    /// Порты по умолчанию для протокола
    pub fn ports(&self, protocol: VpnProtocol) -> &[u16] {
        match protocol {
            VpnProtocol::Ike => &self.ike_ports,
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => &self.openvpn_udp_ports,
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => &self.openvpn_tcp_ports,
        }
    }
}
