//! AWS Signature Version 4 for S3-compatible endpoints.
//!
//! Only what the backend needs: header-signed requests and presigned GET
//! URLs, both with an unsigned payload.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SERVICE: &str = "s3";

pub type SigningResult<T> = std::result::Result<T, hmac::digest::InvalidLength>;

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub content_sha256: &'static str,
    pub authorization: String,
}

/// What gets signed: method, host, already-encoded path and raw query pairs.
#[derive(Debug, Clone)]
pub struct RequestTarget<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Vec<(String, String)>,
}

/// Holds the credentials for one region.
pub struct Signer {
    access_key: SecretString,
    secret_key: SecretString,
    region: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(access_key: SecretString, secret_key: SecretString, region: &str) -> Self {
        Self {
            access_key,
            secret_key,
            region: region.to_string(),
        }
    }

    fn scope(&self, date: &str) -> String {
        format!("{}/{}/{}/aws4_request", date, self.region, SERVICE)
    }

    fn signature(&self, now: DateTime<Utc>, canonical_request: &str) -> SigningResult<String> {
        let date = now.format("%Y%m%d").to_string();
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date(now),
            self.scope(&date),
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = signing_key(self.secret_key.expose_secret(), &date, &self.region)?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }

    /// Signs a request through the `Authorization` header.
    pub fn sign_headers(
        &self,
        target: &RequestTarget<'_>,
        now: DateTime<Utc>,
    ) -> SigningResult<SignedHeaders> {
        let amz_date = amz_date(now);
        let headers = [
            ("host", target.host.to_string()),
            ("x-amz-content-sha256", UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date", amz_date.clone()),
        ];
        let signed = signed_header_names(&headers);
        let canonical = canonical_request(
            target.method,
            target.path,
            &canonical_query(&target.query),
            &headers,
            &signed,
        );

        let signature = self.signature(now, &canonical)?;
        let date = now.format("%Y%m%d").to_string();
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.access_key.expose_secret(),
            self.scope(&date),
            signed,
            signature
        );

        Ok(SignedHeaders {
            amz_date,
            content_sha256: UNSIGNED_PAYLOAD,
            authorization,
        })
    }

    /// Returns the full query string (including `X-Amz-Signature`) of a
    /// presigned URL valid for `expires_secs` from `now`.
    pub fn presign(
        &self,
        target: &RequestTarget<'_>,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> SigningResult<String> {
        let date = now.format("%Y%m%d").to_string();
        let mut query = target.query.clone();
        query.extend([
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key.expose_secret(), self.scope(&date)),
            ),
            ("X-Amz-Date".to_string(), amz_date(now)),
            ("X-Amz-Expires".to_string(), expires_secs.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ]);

        let headers = [("host", target.host.to_string())];
        let query_string = canonical_query(&query);
        let canonical = canonical_request(
            target.method,
            target.path,
            &query_string,
            &headers,
            "host",
        );
        let signature = self.signature(now, &canonical)?;

        Ok(format!("{}&X-Amz-Signature={}", query_string, signature))
    }
}

pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> SigningResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn signing_key(secret: &str, date: &str, region: &str) -> SigningResult<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encodes everything except unreserved characters. `/` is kept when
/// `keep_slash` is set (object key paths).
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if keep_slash => encoded.push('/'),
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

/// Encodes and sorts query pairs into SigV4 canonical form.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, false), uri_encode(v, false)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn signed_header_names(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";")
}

fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(&str, String)],
    signed_headers: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, query, canonical_headers, signed_headers, UNSIGNED_PAYLOAD
    )
}
