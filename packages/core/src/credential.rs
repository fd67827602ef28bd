//! Bearer credential decoding.
//!
//! Koios subscription tokens are JWTs. The client never verifies the
//! signature (the API server does that); it only reads the payload claims
//! so it can show the user their entitlements and pick sensible defaults
//! such as the query timeout.

use std::fmt;
use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// URL-safe alphabet that accepts payload segments with or without `=` padding.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Subscription tier encoded in the token's `tier` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Free,
    Pro,
    Premium,
    Custom,
}

impl Tier {
    fn from_claim(claim: &Value) -> Result<Self, CoreError> {
        let tier = match claim {
            Value::Number(n) => n.as_u64().and_then(Self::from_index),
            Value::String(s) => Self::from_name(s),
            _ => None,
        };
        tier.ok_or_else(|| CoreError::unknown_tier(claim.to_string()))
    }

    fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(Self::Public),
            1 => Some(Self::Free),
            2 => Some(Self::Pro),
            3 => Some(Self::Premium),
            4 => Some(Self::Custom),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "premium" => Some(Self::Premium),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Default quotas granted by the tier.
    pub fn entitlements(self) -> Entitlements {
        let (max_requests_per_day, max_requests_per_second, timeout_secs, cors_restricted) =
            match self {
                Self::Public => (5_000, 10, 30, true),
                Self::Free => (50_000, 10, 30, true),
                Self::Pro => (500_000, 100, 30, false),
                Self::Premium => (1_500_000, 500, 60, false),
                Self::Custom => (3_000_000, 1_000, 120, false),
            };
        Entitlements {
            max_requests_per_day,
            max_requests_per_second,
            max_query_timeout: Duration::from_secs(timeout_secs),
            cors_restricted,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Public => "Public",
            Self::Free => "Free",
            Self::Pro => "Pro",
            Self::Premium => "Premium",
            Self::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// Quotas attached to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlements {
    pub max_requests_per_day: u64,
    pub max_requests_per_second: u32,
    pub max_query_timeout: Duration,
    pub cors_restricted: bool,
}

/// Entitlement record decoded from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub tier: Tier,
    pub project_id: String,
    pub address: String,
    pub expiry: DateTime<Utc>,
    pub max_requests_per_day: u64,
    pub max_requests_per_second: u32,
    pub max_query_timeout: Duration,
    pub cors_restricted: bool,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    addr: String,
    exp: i64,
    tier: Value,
    #[serde(rename = "projID")]
    proj_id: String,
    max_requests: Option<u64>,
    max_rps: Option<u32>,
    max_query_timeout: Option<u64>,
    cors_restricted: Option<bool>,
}

/// Decode a token's payload into a [`Credential`].
///
/// Pure: no network access and no signature check.
pub fn parse(token: &str) -> Result<Credential, CoreError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(CoreError::malformed_credential(format!(
            "expected 3 dot-separated segments, found {}",
            segments.len()
        )));
    }

    let payload = TOKEN_ENGINE
        .decode(segments[1])
        .map_err(|e| CoreError::malformed_credential(format!("payload is not base64url: {}", e)))?;

    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|e| CoreError::malformed_credential(format!("payload is not valid claims JSON: {}", e)))?;

    let tier = Tier::from_claim(&claims.tier)?;

    let expiry = DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or_else(|| {
        CoreError::malformed_credential(format!("exp claim out of range: {}", claims.exp))
    })?;

    let defaults = tier.entitlements();

    Ok(Credential {
        tier,
        project_id: claims.proj_id,
        address: claims.addr,
        expiry,
        max_requests_per_day: claims.max_requests.unwrap_or(defaults.max_requests_per_day),
        max_requests_per_second: claims.max_rps.unwrap_or(defaults.max_requests_per_second),
        max_query_timeout: claims
            .max_query_timeout
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_query_timeout),
        cors_restricted: claims.cors_restricted.unwrap_or(defaults.cors_restricted),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
    use proptest::prelude::*;

    /// Build an unsigned JWT-shaped token around `payload`.
    pub(crate) fn make_token(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{}.{}.c2lnbmF0dXJl", header, body)
    }

    const PRO_CLAIMS: &str =
        r#"{"addr":"stake1u8yxtugdv63wxafy9d00nuz6hjyyp4qnggvc9a3vxh8yl0ckml2uz","exp":1893456000,"tier":2,"projID":"koios-test"}"#;

    #[test]
    fn parses_claims_and_tier_defaults() {
        let credential = parse(&make_token(PRO_CLAIMS)).unwrap();

        assert_eq!(credential.tier, Tier::Pro);
        assert_eq!(credential.project_id, "koios-test");
        assert!(credential.address.starts_with("stake1"));
        assert_eq!(credential.expiry.timestamp(), 1_893_456_000);
        assert_eq!(credential.max_requests_per_day, 500_000);
        assert_eq!(credential.max_requests_per_second, 100);
        assert_eq!(credential.max_query_timeout, Duration::from_secs(30));
        assert!(!credential.cors_restricted);
    }

    #[test]
    fn quota_claims_override_tier_defaults() {
        let token = make_token(
            r#"{"addr":"a","exp":1893456000,"tier":"custom","projID":"p","max_requests":42,"max_rps":7,"max_query_timeout":90,"cors_restricted":true}"#,
        );
        let credential = parse(&token).unwrap();

        assert_eq!(credential.tier, Tier::Custom);
        assert_eq!(credential.max_requests_per_day, 42);
        assert_eq!(credential.max_requests_per_second, 7);
        assert_eq!(credential.max_query_timeout, Duration::from_secs(90));
        assert!(credential.cors_restricted);
    }

    #[test]
    fn padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let body = URL_SAFE.encode(r#"{"addr":"a","exp":1,"tier":1,"projID":"p"}"#);
        let token = format!("{}.{}.sig", header, body);

        assert_eq!(parse(&token).unwrap().tier, Tier::Free);
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        for token in ["", "abc", "a.b", "a.b.c.d"] {
            assert!(
                matches!(parse(token), Err(CoreError::MalformedCredential { .. })),
                "token {:?} should be malformed",
                token
            );
        }
    }

    #[test]
    fn invalid_base64_payload_is_malformed() {
        let result = parse("eyJhbGciOiJub25lIn0.***.sig");
        assert!(matches!(result, Err(CoreError::MalformedCredential { .. })));
    }

    #[test]
    fn non_json_payload_is_malformed() {
        let result = parse(&make_token("not json"));
        assert!(matches!(result, Err(CoreError::MalformedCredential { .. })));
    }

    #[test]
    fn missing_claim_is_malformed() {
        let result = parse(&make_token(r#"{"addr":"a","tier":1,"projID":"p"}"#));
        assert!(matches!(result, Err(CoreError::MalformedCredential { .. })));
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let numeric = parse(&make_token(r#"{"addr":"a","exp":1,"tier":9,"projID":"p"}"#));
        assert!(matches!(numeric, Err(CoreError::UnknownTier { ref tier }) if tier == "9"));

        let named = parse(&make_token(r#"{"addr":"a","exp":1,"tier":"gold","projID":"p"}"#));
        assert!(matches!(named, Err(CoreError::UnknownTier { .. })));
    }

    #[test]
    fn expiry_check_compares_against_now() {
        let credential = parse(&make_token(PRO_CLAIMS)).unwrap();
        let before = DateTime::<Utc>::from_timestamp(1_800_000_000, 0).unwrap();
        let after = DateTime::<Utc>::from_timestamp(1_900_000_000, 0).unwrap();

        assert!(!credential.is_expired(before));
        assert!(credential.is_expired(after));
    }

    proptest! {
        #[test]
        fn parsing_is_deterministic(
            tier in 0u64..5,
            exp in 0i64..4_000_000_000,
            proj in "[a-z0-9-]{1,24}",
        ) {
            let token = make_token(&format!(
                r#"{{"addr":"stake1x","exp":{},"tier":{},"projID":"{}"}}"#,
                exp, tier, proj
            ));
            let first = parse(&token).unwrap();
            let second = parse(&token).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn arbitrary_dotless_input_is_malformed(input in "[^.]{0,64}") {
            let is_malformed = matches!(parse(&input), Err(CoreError::MalformedCredential { .. }));
            prop_assert!(is_malformed);
        }
    }
}
