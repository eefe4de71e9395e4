use hmac::{Mac, NewMac};
use chrono::TimeZone;
use crate::error::{Error, Result};

type HmacSha512 = hmac::Hmac<sha2::Sha512>;

/// How long a download key stays valid.
pub const FILE_KEY_VALIDITY_MINUTES: i64 = 5;

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str, content_type: &str) -> Result<String>;
    async fn read(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct FileKey<'a> {
    file_path: &'a str,
    key: &'a [u8],
    expiry: chrono::DateTime<chrono::Utc>,
}

impl<'a> FileKey<'a> {
    pub fn new(file_path: &'a str, key: &'a [u8], now: chrono::DateTime<chrono::Utc>) -> FileKey<'a> {
        FileKey {
            file_path,
            key,
            expiry: now + chrono::Duration::minutes(FILE_KEY_VALIDITY_MINUTES),
        }
    }

    pub fn verify(file_path: &str, presented: &str, key: &[u8], now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let (expiry_part, code_part) = match presented.split_once(';') {
            Some(p) => p,
            None => return Err(Error::TokenInvalid),
        };
        let expiry = match expiry_part.parse::<i64>() {
            Ok(c) => match chrono::Utc.timestamp_opt(c, 0).single() {
                Some(c) => c,
                None => return Err(Error::TokenInvalid),
            },
            Err(_) => return Err(Error::TokenInvalid),
        };
        let code_bytes = match base64::decode_config(code_part, base64::URL_SAFE_NO_PAD) {
            Ok(c) => c,
            Err(_) => return Err(Error::TokenInvalid),
        };

        let mut mac = new_mac(key)?;
        mac.update(signed_message(file_path, expiry_part).as_bytes());
        if mac.verify(&code_bytes).is_err() {
            return Err(Error::TokenInvalid);
        }
        if expiry < now {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha512> {
    HmacSha512::new_from_slice(key).map_err(|_| Error::Config("invalid files key".to_string()))
}

fn signed_message(file_path: &str, expiry: &str) -> String {
    let file_path = base64::encode_config(file_path.as_bytes(), base64::URL_SAFE_NO_PAD);
    format!("{};{}", file_path, expiry)
}

impl std::fmt::Display for FileKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let expiry = self.expiry.timestamp().to_string();
        let mut mac = new_mac(self.key).map_err(|_| std::fmt::Error)?;
        mac.update(signed_message(self.file_path, &expiry).as_bytes());
        let code_bytes = base64::encode_config(mac.finalize().into_bytes(), base64::URL_SAFE_NO_PAD);
        write!(f, "{};{}", expiry, code_bytes)
    }
}

pub struct FsBlobStore {
    root: std::path::PathBuf,
    base_url: String,
    key: Vec<u8>,
}

impl FsBlobStore {
    pub fn new<P: Into<std::path::PathBuf>>(root: P, base_url: &str, key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("files_key must be set".to_string()));
        }
        Ok(Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_vec(),
        })
    }

    pub fn from_config(config: &crate::Config) -> Result<Self> {
        let base_url = format!("{}/files", config.external_uri.trim_end_matches('/'));
        Self::new(&config.files_dir, &base_url, &config.files_key)
    }

    fn file_name<'u>(&self, url: &'u str) -> Result<&'u str> {
        let url = url.split('?').next().unwrap_or(url);
        let name = url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::Blob(format!("{} is not held by this store", url)))?;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(Error::Blob(format!("invalid file name in {}", url)));
        }
        Ok(name)
    }

    pub fn download_url(&self, url: &str, now: chrono::DateTime<chrono::Utc>) -> Result<String> {
        let name = self.file_name(url)?;
        Ok(format!("{}/{}?key={}", self.base_url, name, FileKey::new(name, &self.key, now)))
    }

    /// Checks the `key` query parameter of a download request.
    pub fn verify_download(&self, file_name: &str, key: &str, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        FileKey::verify(file_name, key, &self.key, now)
    }
}

fn extension_for(file_name: &str) -> &str {
    match std::path::Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "bin",
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str, content_type: &str) -> Result<String> {
        let new_file_name = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(file_name));
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&new_file_name), &bytes).await?;
        debug!("Stored {} ({}, {} bytes) as {}", file_name, content_type, bytes.len(), new_file_name);
        Ok(format!("{}/{}", self.base_url, new_file_name))
    }

    async fn read(&self, url: &str) -> Result<Vec<u8>> {
        let name = self.file_name(url)?;
        match tokio::fs::read(self.root.join(name)).await {
            Ok(b) => Ok(b),
            Err(err) => Err(Error::Blob(format!("unable to read {}: {}", name, err))),
        }
    }
}
