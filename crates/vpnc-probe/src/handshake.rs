//! Пакеты рукопожатия для проверки портов
//!
//! Пакет строится так, чтобы настоящий сервер ответил на него
//! хотя бы одним байтом:
//! - OpenVPN: `P_CONTROL_HARD_RESET_CLIENT_V2` с HMAC-SHA512 (tls-auth)
//! - IKEv2: заголовок `IKE_SA_INIT` со случайным SPI инициатора

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};
use vpnc_core::protocol::OpenVpnTransport;

use crate::error::{ProbeError, Result};

/// Длина HMAC ключа, берётся из конца статического ключа
pub const OPENVPN_HMAC_KEY_LEN: usize = 64;

/// Opcode `P_CONTROL_HARD_RESET_CLIENT_V2` со сдвигом под key_id
const OPCODE_HARD_RESET_CLIENT_V2: u8 = 7 << 3;

/// Packet ID первого управляющего пакета
const FIRST_PACKET_ID: [u8; 4] = [0, 0, 0, 1];

/// Пустой ACK массив и message packet id
const EMPTY_ACK_AND_MESSAGE_ID: [u8; 5] = [0; 5];

/// Порт IKE NAT-T, требующий non-ESP маркер
pub const IKE_NAT_T_PORT: u16 = 4500;

/// Тип обмена IKE_SA_INIT
const IKE_SA_INIT: u8 = 34;

/// Версия IKE 2.0
const IKE_VERSION: u8 = 0x20;

/// Флаг "инициатор"
const IKE_FLAG_INITIATOR: u8 = 0x08;

/// Длина заголовка IKE
pub const IKE_HEADER_LEN: usize = 28;

/// Построитель пакета OpenVPN hard reset
pub struct OpenVpnHandshake {
    key: hmac::Key,
}

impl OpenVpnHandshake {
    /// Разобрать статический ключ
    ///
    /// Принимает как содержимое файла `ta.key` (строки `-----` игнорируются),
    /// так и голую hex строку.
    pub fn from_static_key(static_key: &str) -> Result<Self> {
        let hex_key: String = static_key
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#') && !line.starts_with('-'))
            .collect();

        let bytes = hex::decode(&hex_key).map_err(|e| ProbeError::InvalidStaticKey(e.to_string()))?;
        if bytes.len() < OPENVPN_HMAC_KEY_LEN {
            return Err(ProbeError::StaticKeyTooShort {
                required: OPENVPN_HMAC_KEY_LEN,
                actual: bytes.len(),
            });
        }

        let hmac_key = &bytes[bytes.len() - OPENVPN_HMAC_KEY_LEN..];
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA512, hmac_key),
        })
    }

    /// Пакет со случайным session id и текущим временем
    pub fn packet(&self, transport: OpenVpnTransport) -> Bytes {
        let mut session_id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut session_id);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();

        self.packet_with(session_id, timestamp, transport)
    }

    fn packet_with(&self, session_id: [u8; 8], timestamp: u32, transport: OpenVpnTransport) -> Bytes {
        let mut signed = BytesMut::with_capacity(22);
        signed.put_slice(&FIRST_PACKET_ID);
        signed.put_u32(timestamp);
        signed.put_u8(OPCODE_HARD_RESET_CLIENT_V2);
        signed.put_slice(&session_id);
        signed.put_slice(&EMPTY_ACK_AND_MESSAGE_ID);

        let tag = hmac::sign(&self.key, &signed);

        let mut body = BytesMut::with_capacity(86);
        body.put_u8(OPCODE_HARD_RESET_CLIENT_V2);
        body.put_slice(&session_id);
        body.put_slice(tag.as_ref());
        body.put_slice(&FIRST_PACKET_ID);
        body.put_u32(timestamp);
        body.put_slice(&EMPTY_ACK_AND_MESSAGE_ID);

        match transport {
            OpenVpnTransport::Udp => body.freeze(),
            OpenVpnTransport::Tcp => {
                // В TCP каждый пакет предваряется длиной (big-endian)
                let mut framed = BytesMut::with_capacity(body.len() + 2);
                framed.put_u16(body.len() as u16);
                framed.put_slice(&body);
                framed.freeze()
            }
        }
    }
}

/// Заголовок IKE_SA_INIT для указанного порта
pub fn ike_sa_init(port: u16) -> Bytes {
    let mut spi = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut spi);
    ike_sa_init_with(spi, port)
}

fn ike_sa_init_with(initiator_spi: [u8; 8], port: u16) -> Bytes {
    let mut packet = BytesMut::with_capacity(IKE_HEADER_LEN + 4);
    if port == IKE_NAT_T_PORT {
        packet.put_u32(0);
    }
    packet.put_slice(&initiator_spi);
    packet.put_u64(0); // responder SPI
    packet.put_u8(0); // next payload
    packet.put_u8(IKE_VERSION);
    packet.put_u8(IKE_SA_INIT);
    packet.put_u8(IKE_FLAG_INITIATOR);
    packet.put_u32(0); // message id
    packet.put_u32(IKE_HEADER_LEN as u32);
    packet.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STATIC_KEY;

    #[test]
    fn test_openvpn_packet_layout() {
        let handshake = tokio_test::assert_ok!(OpenVpnHandshake::from_static_key(DEFAULT_STATIC_KEY));
        let sid = [1, 2, 3, 4, 5, 6, 7, 8];
        let packet = handshake.packet_with(sid, 0x0102_0304, OpenVpnTransport::Udp);

        assert_eq!(packet.len(), 1 + 8 + 64 + 4 + 4 + 5);
        assert_eq!(packet[0], 0x38);
        assert_eq!(&packet[1..9], &sid);
        assert_eq!(&packet[73..77], &FIRST_PACKET_ID);
        assert_eq!(&packet[77..81], &[1, 2, 3, 4]);
        assert_eq!(&packet[81..], &[0; 5]);
    }

    #[test]
    fn test_openvpn_hmac_is_verifiable() {
        let handshake = OpenVpnHandshake::from_static_key(DEFAULT_STATIC_KEY).unwrap();
        let sid = [9; 8];
        let packet = handshake.packet_with(sid, 42, OpenVpnTransport::Udp);

        let mut signed = Vec::new();
        signed.extend_from_slice(&FIRST_PACKET_ID);
        signed.extend_from_slice(&42u32.to_be_bytes());
        signed.push(0x38);
        signed.extend_from_slice(&sid);
        signed.extend_from_slice(&[0; 5]);

        assert!(hmac::verify(&handshake.key, &signed, &packet[9..73]).is_ok());
    }

    #[test]
    fn test_openvpn_tcp_length_prefix() {
        let handshake = OpenVpnHandshake::from_static_key(DEFAULT_STATIC_KEY).unwrap();
        let packet = handshake.packet(OpenVpnTransport::Tcp);

        assert_eq!(packet.len(), 88);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), 86);
        assert_eq!(packet[2], 0x38);
    }

    #[test]
    fn test_bad_static_key() {
        assert!(matches!(
            OpenVpnHandshake::from_static_key("zz"),
            Err(ProbeError::InvalidStaticKey(_))
        ));
        assert_eq!(
            OpenVpnHandshake::from_static_key("abcd").err(),
            Some(ProbeError::StaticKeyTooShort { required: 64, actual: 2 })
        );
    }

    #[test]
    fn test_ike_header() {
        let packet = ike_sa_init_with([7; 8], 500);
        assert_eq!(packet.len(), IKE_HEADER_LEN);
        assert_eq!(&packet[0..8], &[7; 8]);
        assert_eq!(&packet[8..16], &[0; 8]);
        assert_eq!(packet[17], IKE_VERSION);
        assert_eq!(packet[18], IKE_SA_INIT);
        assert_eq!(&packet[24..28], &(IKE_HEADER_LEN as u32).to_be_bytes());
    }

    #[test]
    fn test_ike_nat_t_marker() {
        let packet = ike_sa_init(IKE_NAT_T_PORT);
        assert_eq!(packet.len(), IKE_HEADER_LEN + 4);
        assert_eq!(&packet[0..4], &[0; 4]);
    }
}
