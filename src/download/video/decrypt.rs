use std::path::Path;

use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use cbc::Decryptor;
use tracing::info;
use url::Url;

use crate::download::RangeSource;
use crate::error::{DecryptError, DownloadError, Result};

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 16;

/// Fetch the content key. A JSON body means the resolver handed us an error
/// response instead of a key.
pub async fn fetch_key<S>(source: &S, key_url: &Url) -> Result<Bytes>
where
    S: RangeSource + ?Sized,
{
    let key = source.fetch_bytes(key_url).await?;

    if looks_like_json(&key) {
        return Err(DownloadError::InvalidKeyUrl {
            url: key_url.to_string(),
        });
    }

    if key.len() != KEY_SIZE {
        return Err(DecryptError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        }
        .into());
    }

    Ok(key)
}

fn looks_like_json(body: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<serde_json::Value>(body),
        Ok(serde_json::Value::Object(_)) | Ok(serde_json::Value::Array(_))
    )
}

/// Decrypt `payload` laid out as `IV || ciphertext` and drop the trailing
/// zero padding.
pub fn decrypt_payload(payload: &[u8], key: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
    if key.len() != KEY_SIZE {
        return Err(DecryptError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    if payload.len() < BLOCK_SIZE {
        return Err(DecryptError::TooShort(payload.len()));
    }

    let (iv, ciphertext) = payload.split_at(BLOCK_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(DecryptError::Unaligned(ciphertext.len()));
    }

    let decryptor = Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(|e| DecryptError::Cipher(e.to_string()))?;
    let mut plaintext = decryptor
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| DecryptError::Cipher(e.to_string()))?;

    let kept = plaintext.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    plaintext.truncate(kept);

    Ok(plaintext)
}

/// Replace the merged file at `path` with its plaintext.
///
/// The plaintext goes to a sibling file first, so a failed decryption leaves
/// the encrypted file untouched.
pub async fn decrypt_file(path: &Path, key: &[u8]) -> Result<u64> {
    let payload = tokio::fs::read(path).await?;
    let plaintext = decrypt_payload(&payload, key)?;

    let mut staging = path.as_os_str().to_owned();
    staging.push(".part");
    let staging = Path::new(&staging);

    tokio::fs::write(staging, &plaintext).await?;
    tokio::fs::rename(staging, path).await?;

    info!(path = %path.display(), bytes = plaintext.len(), "decrypted video");

    Ok(plaintext.len() as u64)
}
