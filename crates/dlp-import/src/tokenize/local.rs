//! In-process de-identification keyed by a shared secret.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::{DeidService, DeidStrategy, TokenRequest};
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the HMAC digest rendered into a deterministic token (32 hex chars).
const TOKEN_BYTES: usize = 16;

/// HMAC-SHA256 de-identification service.
///
/// Tokens depend only on the key, the domain, the strategy and the value,
/// so they are stable across runs that share a key.
pub struct LocalDeidService {
    key: Vec<u8>,
    token_prefix: String,
}

impl std::fmt::Debug for LocalDeidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDeidService")
            .field("key", &"[REDACTED]")
            .field("token_prefix", &self.token_prefix)
            .finish()
    }
}

impl LocalDeidService {
    pub fn new(key: impl Into<Vec<u8>>, token_prefix: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(MigrateError::Config(
                "the local de-identification service needs a non-empty key".into(),
            ));
        }
        Ok(Self {
            key,
            token_prefix: token_prefix.into(),
        })
    }

    /// De-identify one value.
    pub fn transform(&self, request: &TokenRequest) -> Result<String> {
        match request.strategy {
            DeidStrategy::None => Ok(request.value.clone()),
            DeidStrategy::Mask {
                mask_char,
                keep_last,
            } => Ok(mask(&request.value, mask_char, keep_last)),
            DeidStrategy::DeterministicToken => {
                let digest = self.digest(request, 0)?;
                Ok(format!(
                    "{}{}",
                    self.token_prefix,
                    hex::encode(&digest[..TOKEN_BYTES])
                ))
            }
            DeidStrategy::FormatPreserving => self.format_preserving(request),
        }
    }

    /// HMAC over `domain \0 strategy \0 value`, with a block counter for
    /// outputs longer than one digest.
    fn digest(&self, request: &TokenRequest, block: u32) -> Result<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| MigrateError::deid_fatal(format!("failed to create HMAC: {}", e)))?;
        mac.update(request.domain.as_key().as_bytes());
        mac.update(&[0]);
        mac.update(request.strategy.name().as_bytes());
        mac.update(&[0]);
        mac.update(request.value.as_bytes());
        if block > 0 {
            mac.update(&[0]);
            mac.update(&block.to_be_bytes());
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn format_preserving(&self, request: &TokenRequest) -> Result<String> {
        let mut out = String::with_capacity(request.value.len());
        let mut stream: Vec<u8> = Vec::new();
        let mut block = 0;

        for (i, c) in request.value.chars().enumerate() {
            while stream.len() <= i {
                stream.extend_from_slice(&self.digest(request, block)?);
                block += 1;
            }
            let b = stream[i];
            let mapped = if c.is_ascii_digit() {
                char::from(b'0' + b % 10)
            } else if c.is_ascii_lowercase() {
                char::from(b'a' + b % 26)
            } else if c.is_ascii_uppercase() {
                char::from(b'A' + b % 26)
            } else {
                c
            };
            out.push(mapped);
        }
        Ok(out)
    }
}

/// Replace all but the last `keep_last` characters with `mask_char`.
pub fn mask(value: &str, mask_char: char, keep_last: usize) -> String {
    let len = value.chars().count();
    let masked = len.saturating_sub(keep_last);
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < masked { mask_char } else { c })
        .collect()
}

#[async_trait]
impl DeidService for LocalDeidService {
    async fn tokenize(&self, requests: &[TokenRequest]) -> Result<Vec<String>> {
        requests.iter().map(|r| self.transform(r)).collect()
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TableIdentity, TokenDomain};

    fn service() -> LocalDeidService {
        LocalDeidService::new("test-key", "TOK_").unwrap()
    }

    fn req(column: &str, strategy: DeidStrategy, value: &str) -> TokenRequest {
        TokenRequest {
            domain: TokenDomain::Column(TableIdentity::new("ds", "customers").column(column)),
            strategy,
            value: value.into(),
        }
    }

    #[test]
    fn test_deterministic_token_shape_and_stability() {
        let svc = service();
        let r = req("ssn", DeidStrategy::DeterministicToken, "123-45-6789");
        let a = svc.transform(&r).unwrap();
        let b = service().transform(&r).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("TOK_"));
        assert_eq!(a.len(), 4 + 32);
        assert!(a[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_domains_separate_tokens() {
        let svc = service();
        let a = svc
            .transform(&req("ssn", DeidStrategy::DeterministicToken, "42"))
            .unwrap();
        let b = svc
            .transform(&req("tax_id", DeidStrategy::DeterministicToken, "42"))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_changes_tokens() {
        let r = req("ssn", DeidStrategy::DeterministicToken, "42");
        let other = LocalDeidService::new("other-key", "TOK_").unwrap();
        assert_ne!(service().transform(&r).unwrap(), other.transform(&r).unwrap());
    }

    #[test]
    fn test_format_preserving_keeps_shape() {
        let svc = service();
        let value = "4111-1111-1111-1111 Ab";
        let out = svc
            .transform(&req("card", DeidStrategy::FormatPreserving, value))
            .unwrap();
        assert_eq!(out.chars().count(), value.chars().count());
        for (a, b) in value.chars().zip(out.chars()) {
            assert_eq!(a.is_ascii_digit(), b.is_ascii_digit());
            assert_eq!(a.is_ascii_lowercase(), b.is_ascii_lowercase());
            assert_eq!(a.is_ascii_uppercase(), b.is_ascii_uppercase());
            if !a.is_ascii_alphanumeric() {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_format_preserving_long_values() {
        let value = "9".repeat(100);
        let out = service()
            .transform(&req("card", DeidStrategy::FormatPreserving, &value))
            .unwrap();
        assert_eq!(out.len(), 100);
        assert!(out.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("555-0100", '*', 4), "****0100");
        assert_eq!(mask("abc", '#', 0), "###");
        assert_eq!(mask("ab", '*', 5), "ab");
        assert_eq!(mask("", '*', 2), "");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(LocalDeidService::new(Vec::new(), "TOK_").is_err());
    }
}
