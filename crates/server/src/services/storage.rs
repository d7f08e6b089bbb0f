// S3-compatible object store client with SigV4 request signing. Used for
// floorplan backups and uploaded documents; retrieval goes through presigned,
// time-limited GET URLs generated on read.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    error::{AppError, Result},
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct ObjectStore {
    endpoint: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    url_expiry_secs: u64,
    client: reqwest::Client,
}

impl ObjectStore {
    /// Returns None when no endpoint is configured; callers then skip backup
    /// work instead of failing requests.
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.s3_endpoint.is_empty() {
            return None;
        }
        Some(Self {
            endpoint: config.s3_endpoint.trim_end_matches('/').to_string(),
            bucket: config.s3_bucket.clone(),
            region: config.s3_region.clone(),
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
            url_expiry_secs: config.s3_url_expiry_secs,
            client: reqwest::Client::new(),
        })
    }

    /// Backup key layout, kept stable for backward-compatible backups.
    pub fn floorplan_backup_key(floorplan_id: i64) -> String {
        format!("floorplans/{floorplan_id}.json")
    }

    /// Document key layout: timestamped name preserving the original
    /// extension, so repeated uploads of the same filename never collide.
    pub fn document_key(
        floorplan_id: i64,
        element_id: &str,
        filename: &str,
        now: DateTime<Utc>,
    ) -> String {
        let ext = filename
            .rfind('.')
            .map(|i| &filename[i..])
            .unwrap_or_default();
        format!(
            "documents/{floorplan_id}/{element_id}/{}{ext}",
            now.format("%Y%m%d%H%M%S")
        )
    }

    pub async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));
        let host = self.host()?;
        let path = self.object_path(key);

        let canonical_request = format!(
            "PUT\n{path}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\nhost;x-amz-content-sha256;x-amz-date\n{payload_hash}"
        );
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let signature = self.sign(&canonical_request, &amz_date, &date, &scope);
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}",
            self.access_key
        );

        let url = format!("{}{path}", self.endpoint);
        let response = self
            .client
            .put(&url)
            .header("authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("put failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "put failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Presigned GET URL valid for the configured expiry window.
    pub fn presign_get(&self, key: &str) -> String {
        self.presign_get_at(key, Utc::now())
    }

    fn presign_get_at(&self, key: &str, now: DateTime<Utc>) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let host = self.host().unwrap_or_default();
        let path = self.object_path(key);

        // Query parameters in canonical (sorted) order.
        let query = format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={}&X-Amz-Date={amz_date}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            uri_encode(&format!("{}/{scope}", self.access_key), true),
            self.url_expiry_secs
        );

        let canonical_request =
            format!("GET\n{path}\n{query}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD");
        let signature = self.sign(&canonical_request, &amz_date, &date, &scope);

        format!(
            "{}{path}?{query}&X-Amz-Signature={signature}",
            self.endpoint
        )
    }

    fn object_path(&self, key: &str) -> String {
        format!(
            "/{}/{}",
            uri_encode(&self.bucket, false),
            uri_encode(key.trim_start_matches('/'), false)
        )
    }

    fn host(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| AppError::Storage(format!("invalid endpoint: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::Storage("endpoint has no host".to_string()))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    fn sign(&self, canonical_request: &str, amz_date: &str, date: &str, scope: &str) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let k_date = hmac(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        let k_signing = hmac(&k_service, b"aws4_request");
        hex::encode(hmac(&k_signing, string_to_sign.as_bytes()))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// SigV4 URI encoding: unreserved characters pass through, everything else
/// becomes uppercase percent escapes. Slashes stay literal in object paths.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
