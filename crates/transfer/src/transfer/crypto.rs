//! Password-based file encryption.
//!
//! On-disk layout of a `.crypt` file: `salt[16] || iv[16] || ciphertext`, with
//! AES-256-CBC over PKCS#7-padded plaintext and a PBKDF2-HMAC-SHA256 key.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::Sha256;

use super::paths::resolve_conflict_path;
use crate::models::DecryptReport;
use crate::{AppError, AppResult, ErrorCategory};

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const KDF_ITERATIONS: u32 = 100_000;
pub const CRYPT_EXTENSION: &str = "crypt";
pub const MAX_PASSWORD_ATTEMPTS: u32 = 3;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    key
}

pub fn encrypt_bytes(plaintext: &[u8], password: &str) -> Vec<u8> {
    let salt: [u8; SALT_LEN] = rand::random();
    let iv: [u8; IV_LEN] = rand::random();
    let key = derive_key(password, &salt);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut output = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&iv);
    output.extend_from_slice(&ciphertext);
    output
}

/// Fails with `decryption_failed` on a wrong password or corrupted padding.
pub fn decrypt_bytes(data: &[u8], password: &str) -> AppResult<Vec<u8>> {
    if data.len() < SALT_LEN + IV_LEN {
        return Err(AppError::new(
            "decryption_corrupted",
            "encrypted file is shorter than its header",
        )
        .with_context("length", data.len().to_string()));
    }
    let (salt, rest) = data.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);
    let mut salt_bytes = [0u8; SALT_LEN];
    salt_bytes.copy_from_slice(salt);
    let mut iv_bytes = [0u8; IV_LEN];
    iv_bytes.copy_from_slice(iv);

    let key = derive_key(password, &salt_bytes);
    Aes256CbcDec::new(&key.into(), &iv_bytes.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| {
            AppError::new(
                "decryption_failed",
                "wrong password or corrupted encrypted data",
            )
        })
}

/// Writes an encrypted copy of `path` next to it and returns the copy.
///
/// The copy is `path + ".crypt"`, or a numbered variant when that name is
/// already taken; an existing file is never overwritten.
pub fn encrypt_file(path: &Path, password: &str) -> AppResult<PathBuf> {
    let plaintext = fs::read(path).map_err(|error| {
        AppError::new("filesystem_read_failed", "failed to read file for encryption")
            .with_source(error)
            .with_context("path", path.display().to_string())
    })?;
    let output_path = resolve_conflict_path(&crypt_path(path));
    let write_failed = |error: std::io::Error| {
        AppError::new("filesystem_write_failed", "failed to write encrypted file")
            .with_source(error)
            .with_context("path", output_path.display().to_string())
    };
    let mut output = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&output_path)
        .map_err(write_failed)?;
    output
        .write_all(&encrypt_bytes(&plaintext, password))
        .map_err(write_failed)?;
    Ok(output_path)
}

/// Decrypts `path` next to itself under a collision-free name and returns the
/// output path. The encrypted file is left in place.
pub fn decrypt_file(path: &Path, password: &str) -> AppResult<PathBuf> {
    let data = fs::read(path).map_err(|error| {
        AppError::new("filesystem_read_failed", "failed to read encrypted file")
            .with_source(error)
            .with_context("path", path.display().to_string())
    })?;
    let plaintext = decrypt_bytes(&data, password)
        .map_err(|error| error.with_context("path", path.display().to_string()))?;

    let output_path = resolve_conflict_path(&plain_path(path));
    fs::write(&output_path, plaintext).map_err(|error| {
        AppError::new("filesystem_write_failed", "failed to write decrypted file")
            .with_source(error)
            .with_context("path", output_path.display().to_string())
    })?;
    Ok(output_path)
}

pub fn crypt_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(CRYPT_EXTENSION);
    PathBuf::from(name)
}

pub fn is_crypt_path(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == CRYPT_EXTENSION)
}

fn plain_path(path: &Path) -> PathBuf {
    if is_crypt_path(path) {
        path.with_extension("")
    } else {
        let mut name = OsString::from(path.as_os_str());
        name.push(".decrypted");
        PathBuf::from(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRequest {
    pub files: Vec<PathBuf>,
    pub attempt: u32,
    pub remaining_attempts: u32,
}

/// Asks the user for the batch password. `None` means the prompt was
/// dismissed.
pub trait PasswordPrompt: Send + Sync {
    fn prompt(&self, request: &PasswordRequest) -> Option<String>;
}

/// Never answers; pending files stay encrypted on disk.
pub struct DismissPasswordPrompt;

impl PasswordPrompt for DismissPasswordPrompt {
    fn prompt(&self, _request: &PasswordRequest) -> Option<String> {
        None
    }
}

/// Decrypts a received batch with one password shared by every file.
///
/// Files that fail are retried with the next password; after
/// [`MAX_PASSWORD_ATTEMPTS`] wrong passwords the remaining files are deleted.
/// Each `.crypt` file is removed once its plaintext is written.
pub fn decrypt_batch(paths: Vec<PathBuf>, prompt: &dyn PasswordPrompt) -> DecryptReport {
    let mut report = DecryptReport::default();
    let mut pending = paths;

    for attempt in 1..=MAX_PASSWORD_ATTEMPTS {
        if pending.is_empty() {
            break;
        }
        let request = PasswordRequest {
            files: pending.clone(),
            attempt,
            remaining_attempts: MAX_PASSWORD_ATTEMPTS - attempt + 1,
        };
        let Some(password) = prompt.prompt(&request) else {
            tracing::info!(event = "decrypt_prompt_dismissed", pending = pending.len());
            report.skipped.append(&mut pending);
            return report;
        };

        let mut failed = Vec::new();
        for path in pending.drain(..) {
            match decrypt_file(&path, &password) {
                Ok(output) => {
                    if let Err(error) = fs::remove_file(&path) {
                        tracing::warn!(
                            event = "decrypt_source_remove_failed",
                            path = %path.display(),
                            error = error.to_string()
                        );
                    }
                    report.decrypted.push(output);
                }
                Err(error) if error.category() == ErrorCategory::Decryption => {
                    failed.push(path);
                }
                Err(error) => {
                    tracing::warn!(
                        event = "decrypt_file_failed",
                        path = %path.display(),
                        error_code = %error.code
                    );
                    report.skipped.push(path);
                }
            }
        }
        if !failed.is_empty() {
            tracing::warn!(
                event = "decrypt_attempt_failed",
                attempt,
                failed = failed.len()
            );
        }
        pending = failed;
    }

    for path in pending {
        match fs::remove_file(&path) {
            Ok(()) => report.deleted.push(path),
            Err(error) => {
                tracing::warn!(
                    event = "decrypt_cleanup_failed",
                    path = %path.display(),
                    error = error.to_string()
                );
                report.skipped.push(path);
            }
        }
    }
    report
}

#[cfg(test)]
#[path = "../../tests/transfer/crypto_tests.rs"]
mod tests;
