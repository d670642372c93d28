use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Sealed form of one secret, stored as a compact JSON string.
#[derive(Serialize, Deserialize)]
struct Envelope {
    encrypted_dek: String,
    dek_nonce: String,
    encrypted_secret: String,
    secret_nonce: String,
}

/// AES-256-GCM envelope encryption keyed by the process master key.
///
/// Each secret gets a fresh data key; the data key is wrapped with the
/// master key and stored next to the ciphertext.
pub struct VaultCrypto {
    kek: Zeroizing<[u8; 32]>,
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        Ok(Self::from_key(parse_master_key(master_key_hex)?))
    }

    pub fn from_key(kek: [u8; 32]) -> Self {
        Self {
            kek: Zeroizing::new(kek),
        }
    }

    /// Random master key as 64 hex chars.
    pub fn generate_key_hex() -> String {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        hex::encode(&key[..])
    }

    pub fn seal(&self, plaintext: &str) -> anyhow::Result<String> {
        let mut dek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut dek[..]);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(Nonce::from_slice(&secret_nonce), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), &dek[..])
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        let envelope = Envelope {
            encrypted_dek: B64.encode(encrypted_dek),
            dek_nonce: B64.encode(dek_nonce),
            encrypted_secret: B64.encode(encrypted_secret),
            secret_nonce: B64.encode(secret_nonce),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn open(&self, sealed: &str) -> anyhow::Result<String> {
        let envelope: Envelope = serde_json::from_str(sealed)
            .map_err(|e| anyhow::anyhow!("malformed sealed secret: {}", e))?;
        let encrypted_dek = B64.decode(&envelope.encrypted_dek)?;
        let dek_nonce = decode_nonce(&envelope.dek_nonce)?;
        let encrypted_secret = B64.decode(&envelope.encrypted_secret)?;
        let secret_nonce = decode_nonce(&envelope.secret_nonce)?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(Nonce::from_slice(&dek_nonce), encrypted_dek.as_slice())
                .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?,
        );
        if dek_bytes.len() != 32 {
            anyhow::bail!("unwrapped DEK has {} bytes, expected 32", dek_bytes.len());
        }

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let plaintext = secret_cipher
            .decrypt(Nonce::from_slice(&secret_nonce), encrypted_secret.as_slice())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn decode_nonce(b64: &str) -> anyhow::Result<[u8; 12]> {
    let bytes = B64.decode(b64)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("nonce must be 12 bytes, got {}", v.len()))
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    let hex = hex.trim();
    if hex.len() != 64 {
        anyhow::bail!(
            "BROKER_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
