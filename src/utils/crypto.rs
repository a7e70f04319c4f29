// 加密工具函数
// 提供网关交易资料的加解密、HashInfo签名验证、安全随机字符串等功能

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::distributions::Uniform;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::FieldSet;

/// 网关使用16字节IV的AES-256-GCM
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// GCM认证标签长度
const TAG_LEN: usize = 16;

/// 密文与标签之间的分隔符
const TAG_SEPARATOR: &str = ":::";

/// 编解码错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// 签名不匹配
    #[error("signature mismatch")]
    Integrity,
    /// 签名正确但内容无法解析
    #[error("malformed payload: {0}")]
    Decode(String),
    /// 密钥或加密器错误
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// 加密后的交易资料
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// 十六进制密文 (EncryptInfo)
    pub encrypt_info: String,
    /// 签名 (HashInfo)
    pub hash_info: String,
}

/// 交易资料加解密接口
///
/// 网关的字节级加密方案以此接口隔离，便于替换与单独测试。
pub trait TradeCipher: Send + Sync {
    /// 按字段顺序序列化、加密并签名
    fn encode(&self, fields: &FieldSet) -> Result<SealedPayload, CodecError>;

    /// 先验证签名再解密，签名不符时不会尝试解密
    fn decode(&self, encrypt_info: &str, hash_info: &str) -> Result<FieldSet, CodecError>;
}

/// PayUni 交易资料编解码器
///
/// * EncryptInfo = hex(base64(密文) + ":::" + base64(认证标签))
/// * HashInfo = 大写hex(SHA256(HashKey + EncryptInfo + HashIV))
pub struct PayuniCodec {
    hash_key: SecretString,
    hash_iv: SecretString,
}

impl PayuniCodec {
    /// 创建编解码器
    ///
    /// # Arguments
    /// * `hash_key` - 32字节加密密钥
    /// * `hash_iv` - 16字节初始向量
    pub fn new(hash_key: SecretString, hash_iv: SecretString) -> Result<Self, CodecError> {
        if hash_key.expose_secret().len() != 32 {
            return Err(CodecError::Cipher("hash key must be 32 bytes".to_string()));
        }
        if hash_iv.expose_secret().len() != 16 {
            return Err(CodecError::Cipher("hash iv must be 16 bytes".to_string()));
        }
        Ok(Self { hash_key, hash_iv })
    }

    fn cipher(&self) -> Result<Aes256Gcm16, CodecError> {
        Aes256Gcm16::new_from_slice(self.hash_key.expose_secret().as_bytes())
            .map_err(|e| CodecError::Cipher(e.to_string()))
    }

    /// 计算 HashInfo
    pub fn sign(&self, encrypt_info: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_key.expose_secret().as_bytes());
        hasher.update(encrypt_info.as_bytes());
        hasher.update(self.hash_iv.expose_secret().as_bytes());
        hex::encode_upper(hasher.finalize())
    }
}

impl TradeCipher for PayuniCodec {
    fn encode(&self, fields: &FieldSet) -> Result<SealedPayload, CodecError> {
        let query = serde_urlencoded::to_string(fields.pairs())
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let nonce = GenericArray::from_slice(self.hash_iv.expose_secret().as_bytes());
        let sealed = self
            .cipher()?
            .encrypt(nonce, query.as_bytes())
            .map_err(|_| CodecError::Cipher("encryption failed".to_string()))?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let joined = format!(
            "{}{}{}",
            STANDARD.encode(ciphertext),
            TAG_SEPARATOR,
            STANDARD.encode(tag)
        );
        let encrypt_info = hex::encode(joined);
        let hash_info = self.sign(&encrypt_info);

        Ok(SealedPayload {
            encrypt_info,
            hash_info,
        })
    }

    fn decode(&self, encrypt_info: &str, hash_info: &str) -> Result<FieldSet, CodecError> {
        let expected = self.sign(encrypt_info);
        if !bool::from(expected.as_bytes().ct_eq(hash_info.as_bytes())) {
            return Err(CodecError::Integrity);
        }

        let joined = hex::decode(encrypt_info)
            .map_err(|e| CodecError::Decode(format!("invalid hex: {}", e)))?;
        let joined = String::from_utf8(joined)
            .map_err(|_| CodecError::Decode("payload is not utf-8".to_string()))?;
        let (ciphertext, tag) = joined
            .split_once(TAG_SEPARATOR)
            .ok_or_else(|| CodecError::Decode("missing tag separator".to_string()))?;

        let mut sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| CodecError::Decode(format!("invalid ciphertext: {}", e)))?;
        let tag = STANDARD
            .decode(tag)
            .map_err(|e| CodecError::Decode(format!("invalid tag: {}", e)))?;
        if tag.len() != TAG_LEN {
            return Err(CodecError::Decode("invalid tag length".to_string()));
        }
        sealed.extend_from_slice(&tag);

        let nonce = GenericArray::from_slice(self.hash_iv.expose_secret().as_bytes());
        // 签名已通过，解密失败说明签名方持有密钥却送出了损坏的数据
        let plain = self
            .cipher()?
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CodecError::Integrity)?;
        let plain = String::from_utf8(plain)
            .map_err(|_| CodecError::Decode("decrypted payload is not utf-8".to_string()))?;

        parse_fields(&plain)
    }
}

/// 解析 key=value&key=value 格式
fn parse_fields(query: &str) -> Result<FieldSet, CodecError> {
    if query.is_empty() {
        return Ok(FieldSet::new());
    }
    if query.split('&').any(|pair| !pair.contains('=')) {
        return Err(CodecError::Decode("payload is not key-value data".to_string()));
    }
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if pairs.iter().any(|(key, _)| key.is_empty()) {
        return Err(CodecError::Decode("empty field name".to_string()));
    }
    Ok(FieldSet::from(pairs))
}

/// 生成安全的随机字符串
///
/// # Arguments
/// * `length` - 字符串长度
/// * `charset` - 可用字符集
///
/// # Returns
/// * 随机字符串
pub fn generate_random_string(length: usize, charset: &[u8]) -> String {
    let range = Uniform::from(0..charset.len());
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| charset[rng.sample(range)] as char)
        .collect()
}

/// 大小写字母与数字
pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// 大写字母与数字
pub const UPPER_ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PayuniCodec {
        PayuniCodec::new(
            SecretString::new("12345678901234567890123456789012".to_string()),
            SecretString::new("1234567890123456".to_string()),
        )
        .unwrap()
    }

    fn sample_fields() -> Vec<FieldSet> {
        let mut one_time = FieldSet::new();
        one_time
            .push("MerID", "S01234567")
            .push("MerTradeNo", "P240101120000ABC123")
            .push("TradeAmt", "990")
            .push("ProdDesc", "月费方案 & 电子书")
            .push("ReturnURL", "https://shop.example.com/payment-return?x=1");

        let mut notify = FieldSet::new();
        notify
            .push("Status", "SUCCESS")
            .push("Message", "授权成功")
            .push("MerTradeNo", "S240101120000XYZ789")
            .push("TradeNo", "1700000000123456789");

        let mut with_empty = FieldSet::new();
        with_empty.push("MerID", "S01").push("Note", "");

        vec![one_time, notify, with_empty, FieldSet::new()]
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        for fields in sample_fields() {
            let sealed = codec.encode(&fields).unwrap();
            let decoded = codec.decode(&sealed.encrypt_info, &sealed.hash_info).unwrap();
            assert_eq!(decoded, fields);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = codec();
        let fields = &sample_fields()[0];
        assert_eq!(codec.encode(fields).unwrap(), codec.encode(fields).unwrap());
    }

    #[test]
    fn test_hash_info_is_uppercase_sha256() {
        let sealed = codec().encode(&sample_fields()[0]).unwrap();
        assert_eq!(sealed.hash_info.len(), 64);
        assert!(sealed
            .hash_info
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_single_byte_tamper_detected() {
        let codec = codec();
        for fields in sample_fields() {
            let sealed = codec.encode(&fields).unwrap();

            for i in 0..sealed.encrypt_info.len() {
                let mut bytes = sealed.encrypt_info.clone().into_bytes();
                bytes[i] ^= 0x01;
                let tampered = String::from_utf8(bytes).unwrap();
                assert_eq!(
                    codec.decode(&tampered, &sealed.hash_info),
                    Err(CodecError::Integrity)
                );
            }

            for i in 0..sealed.hash_info.len() {
                let mut bytes = sealed.hash_info.clone().into_bytes();
                bytes[i] ^= 0x01;
                let tampered = String::from_utf8(bytes).unwrap();
                assert_eq!(
                    codec.decode(&sealed.encrypt_info, &tampered),
                    Err(CodecError::Integrity)
                );
            }
        }
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let sealed = codec().encode(&sample_fields()[0]).unwrap();
        let other = PayuniCodec::new(
            SecretString::new("abcdefghijklmnopqrstuvwxyz012345".to_string()),
            SecretString::new("1234567890123456".to_string()),
        )
        .unwrap();
        assert_eq!(
            other.decode(&sealed.encrypt_info, &sealed.hash_info),
            Err(CodecError::Integrity)
        );
    }

    #[test]
    fn test_signed_garbage_is_decode_error() {
        let codec = codec();
        let encrypt_info = hex::encode("not-a-valid-envelope");
        let hash_info = codec.sign(&encrypt_info);
        assert!(matches!(
            codec.decode(&encrypt_info, &hash_info),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_fields_rejects_non_key_value() {
        assert!(parse_fields("just some text").is_err());
        assert!(parse_fields("=orphan").is_err());
        assert_eq!(parse_fields("a=1&b=2").unwrap().get("b"), Some("2"));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(PayuniCodec::new(
            SecretString::new("short".to_string()),
            SecretString::new("1234567890123456".to_string()),
        )
        .is_err());
    }

    #[test]
    fn test_generate_random_string() {
        let value = generate_random_string(32, ALPHANUMERIC);
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(value, generate_random_string(32, ALPHANUMERIC));
    }
}
