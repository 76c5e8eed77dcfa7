//! HTTP Signatures for outbound ActivityPub requests
//!
//! Signing follows the draft-cavage scheme used across the fediverse:
//! https://docs.joinmastodon.org/spec/security/

use crate::error::AppError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// PEM-encoded RSA key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Generate an RSA key pair on the blocking pool.
pub async fn generate_key_pair(bits: usize) -> Result<KeyPair, AppError> {
    tokio::task::spawn_blocking(move || -> Result<KeyPair, anyhow::Error> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(KeyPair {
            private_key_pem: private_key.to_pkcs8_pem(LineEnding::LF)?.to_string(),
            public_key_pem: public_key.to_public_key_pem(LineEnding::LF)?,
        })
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .map_err(AppError::Internal)
}

/// Sign an HTTP request
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PKCS#8 PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Validation("Missing host in URL".to_string())),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    // RFC 2822 with a literal GMT zone
    let date = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();

    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!(
            "(request-target): {} {}",
            method.to_lowercase(),
            path_and_query
        ),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid private key: {}", e)))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        BASE64.encode(signature.to_bytes())
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

/// `SHA-256=<base64>` digest of a request body
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("SHA-256={}", BASE64.encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;
    use rsa::signature::Verifier;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/test_private_key.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/test_public_key.pem");

    fn signature_field<'a>(header: &'a str, name: &str) -> &'a str {
        header
            .split(',')
            .find_map(|part| part.strip_prefix(&format!("{}=\"", name)))
            .and_then(|value| value.strip_suffix('"'))
            .unwrap()
    }

    #[test]
    fn digest_is_sha256_base64() {
        assert_eq!(
            generate_digest(b"hello"),
            "SHA-256=LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
    }

    #[test]
    fn sign_request_produces_verifiable_signature() {
        let body = br#"{"type":"Accept"}"#;
        let headers = sign_request(
            "POST",
            "https://remote.example:8443/users/bob/inbox?x=1",
            Some(body),
            PRIVATE_KEY,
            "https://local.example/users/alice#main-key",
        )
        .unwrap();

        assert_eq!(
            signature_field(&headers.signature, "keyId"),
            "https://local.example/users/alice#main-key"
        );
        assert_eq!(
            signature_field(&headers.signature, "headers"),
            "(request-target) host date digest"
        );

        let signing_string = format!(
            "(request-target): post /users/bob/inbox?x=1\nhost: remote.example:8443\ndate: {}\ndigest: {}",
            headers.date,
            headers.digest.as_deref().unwrap()
        );
        let signature_bytes = BASE64
            .decode(signature_field(&headers.signature, "signature"))
            .unwrap();
        let signature =
            rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();
        let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(
            RsaPublicKey::from_public_key_pem(PUBLIC_KEY).unwrap(),
        );

        assert!(verifier
            .verify(signing_string.as_bytes(), &signature)
            .is_ok());
    }

    #[test]
    fn signature_is_standard_pkcs1_sha256() {
        let headers = sign_request(
            "GET",
            "https://remote.example/users/bob",
            None,
            PRIVATE_KEY,
            "https://local.example/users/alice#main-key",
        )
        .unwrap();

        let signing_string = format!(
            "(request-target): get /users/bob\nhost: remote.example\ndate: {}",
            headers.date
        );
        let hashed = Sha256::digest(signing_string.as_bytes());
        let signature_bytes = BASE64
            .decode(signature_field(&headers.signature, "signature"))
            .unwrap();

        // DigestInfo-prefixed RSASSA-PKCS1-v1_5, as OpenSSL-based peers check it
        let public_key = RsaPublicKey::from_public_key_pem(PUBLIC_KEY).unwrap();
        assert!(public_key
            .verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature_bytes)
            .is_ok());
    }

    #[test]
    fn sign_request_without_body_omits_digest() {
        let headers = sign_request(
            "GET",
            "https://remote.example/users/bob",
            None,
            PRIVATE_KEY,
            "https://local.example/users/alice#main-key",
        )
        .unwrap();

        assert!(headers.digest.is_none());
        assert_eq!(
            signature_field(&headers.signature, "headers"),
            "(request-target) host date"
        );
    }

    #[test]
    fn sign_request_rejects_garbage_key() {
        let result = sign_request(
            "POST",
            "https://remote.example/inbox",
            Some(b"{}"),
            "not a key",
            "https://local.example/users/alice#main-key",
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
