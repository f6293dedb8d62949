//! Конфигурация клиента
//!
//! Этот модуль отвечает за загрузку и валидацию конфигурации клиента:
//! тайм-ауты подключения, набор транспортов Smart Protocol и их порты.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vpnc_probe::handshake::OpenVpnHandshake;
use vpnc_probe::{ProbeConfig, SmartProtocolConfig};

/// Конфигурация клиента VPN
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Настройки подключения
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Настройки Smart Protocol
    #[serde(default)]
    pub smart_protocol: SmartProtocolSettings,

    /// Настройки OpenVPN
    #[serde(default)]
    pub openvpn: OpenVpnSettings,

    /// Настройки IKEv2
    #[serde(default)]
    pub ike: IkeSettings,

    /// Настройки логирования
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Настройки подключения
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Тайм-аут попытки подключения (секунды)
    #[serde(default = "default_connection_timeout")]
    pub timeout_secs: u64,

    /// Пауза между отключением и подключением при смене протокола (секунды)
    #[serde(default = "default_protocol_change_delay")]
    pub protocol_change_delay_secs: u64,

    /// Возраст оценок серверов, после которого выводится предупреждение (секунды)
    #[serde(default = "default_stale_catalog")]
    pub stale_catalog_secs: u64,
}

/// Настройки Smart Protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartProtocolSettings {
    /// Использовать автоматический выбор протокола по умолчанию
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Проверять IKEv2
    #[serde(default = "default_true")]
    pub ikev2: bool,

    /// Проверять OpenVPN UDP
    #[serde(default = "default_true")]
    pub openvpn_udp: bool,

    /// Проверять OpenVPN TCP
    #[serde(default = "default_true")]
    pub openvpn_tcp: bool,

    /// Тайм-аут проверки одного порта (миллисекунды)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

/// Настройки OpenVPN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenVpnSettings {
    /// Порты UDP
    #[serde(default = "default_openvpn_udp_ports")]
    pub udp_ports: Vec<u16>,

    /// Порты TCP
    #[serde(default = "default_openvpn_tcp_ports")]
    pub tcp_ports: Vec<u16>,

    /// Статический ключ tls-auth (hex или содержимое ta.key)
    #[serde(default = "default_static_key")]
    pub static_key: String,
}

/// Настройки IKEv2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IkeSettings {
    /// Порты IKE
    #[serde(default = "default_ike_ports")]
    pub ports: Vec<u16>,
}

/// Настройки логирования
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Уровень логирования (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Значения по умолчанию
fn default_connection_timeout() -> u64 {
    30
}

fn default_protocol_change_delay() -> u64 {
    2
}

fn default_stale_catalog() -> u64 {
    2 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_openvpn_udp_ports() -> Vec<u16> {
    vec![443, 1194, 4569, 5060, 80]
}

fn default_openvpn_tcp_ports() -> Vec<u16> {
    vec![443, 3389, 8080, 8443]
}

fn default_static_key() -> String {
    vpnc_probe::config::DEFAULT_STATIC_KEY.to_string()
}

fn default_ike_ports() -> Vec<u16> {
    vec![500, 4500]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_connection_timeout(),
            protocol_change_delay_secs: default_protocol_change_delay(),
            stale_catalog_secs: default_stale_catalog(),
        }
    }
}

impl Default for SmartProtocolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ikev2: true,
            openvpn_udp: true,
            openvpn_tcp: true,
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for OpenVpnSettings {
    fn default() -> Self {
        Self {
            udp_ports: default_openvpn_udp_ports(),
            tcp_ports: default_openvpn_tcp_ports(),
            static_key: default_static_key(),
        }
    }
}

impl Default for IkeSettings {
    fn default() -> Self {
        Self {
            ports: default_ike_ports(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn validate_ports(name: &str, enabled: bool, ports: &[u16]) -> Result<(), anyhow::Error> {
    if enabled && ports.is_empty() {
        anyhow::bail!("Список портов {} не может быть пустым", name);
    }
    if ports.contains(&0) {
        anyhow::bail!("Порт 0 недопустим в списке {}", name);
    }
    Ok(())
}

impl ClientConfig {
    /// Загрузить конфигурацию из TOML файла
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сохранить конфигурацию в TOML файл
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Валидация конфигурации
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.connection.timeout_secs == 0 {
            anyhow::bail!("Тайм-аут подключения не может быть 0");
        }

        if self.smart_protocol.probe_timeout_ms == 0 {
            anyhow::bail!("Тайм-аут проверки порта не может быть 0");
        }

        let smart = &self.smart_protocol;
        validate_ports("IKEv2", smart.ikev2, &self.ike.ports)?;
        validate_ports("OpenVPN UDP", smart.openvpn_udp, &self.openvpn.udp_ports)?;
        validate_ports("OpenVPN TCP", smart.openvpn_tcp, &self.openvpn.tcp_ports)?;

        // Ключ разбирается так же, как при построении пакета
        OpenVpnHandshake::from_static_key(&self.openvpn.static_key)?;

        Ok(())
    }

    /// Получить тайм-аут попытки подключения
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout_secs)
    }

    /// Получить паузу при смене протокола
    pub fn protocol_change_delay(&self) -> Duration {
        Duration::from_secs(self.connection.protocol_change_delay_secs)
    }

    /// Возраст каталога, после которого пишется предупреждение
    pub fn stale_catalog_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.connection.stale_catalog_secs as i64)
    }

    /// Параметры проверки портов
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(self.smart_protocol.probe_timeout_ms),
            ike_ports: self.ike.ports.clone(),
            openvpn_udp_ports: self.openvpn.udp_ports.clone(),
            openvpn_tcp_ports: self.openvpn.tcp_ports.clone(),
            openvpn_static_key: self.openvpn.static_key.clone(),
        }
    }

    /// Транспорты, участвующие в автоматическом выборе
    pub fn smart_protocol_config(&self) -> SmartProtocolConfig {
        SmartProtocolConfig {
            ikev2: self.smart_protocol.ikev2,
            openvpn_udp: self.smart_protocol.openvpn_udp,
            openvpn_tcp: self.smart_protocol.openvpn_tcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));
        assert_eq!(config.probe_config().timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();

        config.connection.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.connection.timeout_secs = 30;

        config.openvpn.tcp_ports.clear();
        assert!(config.validate().is_err());

        // отключённый транспорт может не иметь портов
        config.smart_protocol.openvpn_tcp = false;
        assert!(config.validate().is_ok());

        config.ike.ports.push(0);
        assert!(config.validate().is_err());
        config.ike.ports.pop();

        config.openvpn.static_key = "not hex".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [connection]
            timeout_secs = 45

            [ike]
            ports = [4500]
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.timeout_secs, 45);
        assert_eq!(config.connection.protocol_change_delay_secs, 2);
        assert_eq!(config.ike.ports, vec![4500]);
        assert_eq!(config.openvpn.udp_ports, vec![443, 1194, 4569, 5060, 80]);
        assert!(config.smart_protocol.enabled);
    }

    #[test]
    fn test_toml_serialization() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("timeout_secs"));

        let deserialized: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.openvpn.tcp_ports, deserialized.openvpn.tcp_ports);
        assert_eq!(config.openvpn.static_key, deserialized.openvpn.static_key);
    }
}
