// Copyright (C) 2025 the bloglist developers
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # bloglist Authentication Tokens
//!
//! Successful logins are answered with an access token: a [JWT] signed with one of the service's
//! signing keys. This module holds the signing keys (securely in memory, versioned so they can be
//! rotated), and mints & verifies the tokens themselves.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html
//!
//! The set of currently supported keys is read from configuration at startup; they might be
//! written down in the bloglist configuration file like so:
//!
//! ```toml
//! [signing-keys.signing-keys.keys]
//! "keyid:2025-02-12" = [1, 2, 3, 4, ..., 64] # Keys must be 64 octets in length
//! "keyid:2025-02-15" = [65, 66, 67, ..., 128]
//! ```
//!
//! The operator can begin the process of rotating the signing key by simply adding a new key with
//! a later version identifier (the versions are compared lexicographically) and either
//! re-starting the program or sending it a SIGHUP. From that point on, the new key will be used
//! for any users that login. Extant sessions have the key ID that was current when they logged-in
//! encoded in their token, so it can be looked-up in order to continue to verify their token
//! until it expires.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Deserializer, Serialize};
use serde_bytes::ByteBuf;
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};

use crate::entities::Username;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to recognize {text} as a KeyId"))]
    BadKeyId { text: String, backtrace: Backtrace },
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: crypto_common::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("The Key ID was missing from the JWT"))]
    MissingKeyId { backtrace: Backtrace },
    #[snafu(display("No signing key available"))]
    NoKey { backtrace: Backtrace },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse JWT: {source}"))]
    Parse {
        source: jwt::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Signing keys must be 64 octets in length"))]
    SigningKeyLength { backtrace: Backtrace },
    #[snafu(display("Unknown token audience {audience}"))]
    UnknownAudience {
        audience: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer}"))]
    UnknownIssuer {
        issuer: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             KeyId                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref KEY_ID: Regex = Regex::new("^keyid:[-0-9a-zA-Z]+$").unwrap(/* known good */);
}

/// A refined type naming a signing key; of the form "keyid:[-0-9a-zA-Z]+"
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(s: &str) -> Result<KeyId> {
        if KEY_ID.find(s).is_none() {
            BadKeyIdSnafu { text: s.to_owned() }.fail()
        } else {
            Ok(KeyId(s.to_owned()))
        }
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `KeyId`; this
// is what lets the configuration file be checked at parse time.
impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        KeyId::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{:?}", err)))
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KeyId::new(s)
    }
}

impl From<KeyId> for String {
    fn from(value: KeyId) -> Self {
        value.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           SigningKey                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type enforcing a key length (of 64 octets)
#[derive(Clone, Debug)]
pub struct SigningKey(SecretSlice<u8>);

impl SigningKey {
    pub fn new(b: Vec<u8>) -> Result<SigningKey> {
        if b.len() == 64 {
            Ok(SigningKey(b.into()))
        } else {
            SigningKeyLengthSnafu.fail()
        }
    }
    fn expose_secret(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

// Implement `Deserialize` by hand so that an undersized key is rejected when the configuration
// file is parsed, not when the first login comes in.
impl<'de> Deserialize<'de> for SigningKey {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <ByteBuf as serde::Deserialize>::deserialize(deserializer)?;
        SigningKey::new(bytes.into_vec())
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{:?}", err)))
    }
}

impl Default for SigningKey {
    fn default() -> Self {
        let mut bytes: Vec<u8> = vec![0; 64];
        OsRng.fill_bytes(&mut bytes);
        SigningKey(bytes.into())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          SigningKeys                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
pub struct SigningKeys {
    keys: BTreeMap<KeyId, SigningKey>,
}

impl SigningKeys {
    /// Retrieve the current (i.e. the most recent) SigningKey
    pub fn current(&self) -> Result<(KeyId, SigningKey)> {
        let (key, value) = self.keys.last_key_value().context(NoKeySnafu)?;
        Ok((key.clone(), value.clone()))
    }
    /// Retrieve a signing key by version
    pub fn find_by_version(&self, keyid: &KeyId) -> Result<SigningKey> {
        Ok(self.keys.get(keyid).context(NoKeySnafu)?.clone())
    }
}

impl Default for SigningKeys {
    fn default() -> Self {
        SigningKeys {
            keys: BTreeMap::from_iter(vec![(
                KeyId(chrono::Local::now().format("keyid:%Y%m%d").to_string()),
                SigningKey::default(),
            )]),
        }
    }
}

impl<const N: usize> From<[(KeyId, SigningKey); N]> for SigningKeys {
    fn from(value: [(KeyId, SigningKey); N]) -> Self {
        Self {
            keys: BTreeMap::from(value),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Access Tokens                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// bloglist access [JWT] [claims]
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
#[derive(Clone, Debug, Deserialize, Serialize)]
struct AccessClaims {
    #[serde(rename = "iat")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: String,
    #[serde(rename = "nbf")]
    not_before: DateTime<Utc>,
    #[serde(rename = "exp")]
    expires: DateTime<Utc>,
    #[serde(rename = "sub")]
    subject: Username,
}

/// Mint a new JWT
///
/// Mint a new token naming `username`, signed using `signing_key` (identified by `keyid`). The
/// token will be valid for duration `lifetime`.
///
/// The fully serialized JWT will be returned.
pub fn mint_token(
    username: &Username,
    keyid: &KeyId,
    signing_key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    let key: Hmac<Sha256> =
        Hmac::new_from_slice(signing_key.expose_secret()).context(HmacSnafu)?;
    let header = Header {
        key_id: Some(keyid.to_string()),
        ..Default::default()
    };
    let now = Utc::now();
    let claims = AccessClaims {
        issued_at: now,
        issuer: issuer.to_owned(),
        audience: format!("api.{}", issuer),
        not_before: now,
        expires: now + *lifetime,
        subject: username.clone(),
    };
    Ok(Token::new(header, claims)
        .sign_with_key(&key)
        .context(SignatureSnafu)?
        .as_str()
        .to_owned())
}

/// Verify a JWT; on success, return the [Username] it names
///
/// Verification checks the signature (against the key named in the token's header), the validity
/// window, the issuer & the audience.
pub fn verify_token(token_string: &str, keys: &SigningKeys, issuer: &str) -> Result<Username> {
    let token: Token<Header, AccessClaims, _ /* Unverified<'_> */> =
        Token::parse_unverified(token_string).context(ParseSnafu)?;
    let keyid = token
        .header()
        .key_id
        .clone()
        .ok_or(MissingKeyIdSnafu.build())?;
    let keyid = KeyId::new(&keyid)?;
    let signing_key = keys.find_by_version(&keyid)?;
    let key: Hmac<Sha256> =
        Hmac::new_from_slice(signing_key.expose_secret()).context(HmacSnafu)?;
    let token: Token<Header, AccessClaims, _> = token_string
        .verify_with_key(&key)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();

    if now < claims.not_before {
        return NotBeforeSnafu {
            not_before: claims.not_before,
        }
        .fail();
    }
    if now > claims.expires {
        return ExpiredSnafu {
            expires: claims.expires,
        }
        .fail();
    }
    if claims.issuer != issuer {
        return UnknownIssuerSnafu {
            issuer: claims.issuer.clone(),
        }
        .fail();
    }
    if format!("api.{}", issuer) != claims.audience {
        return UnknownAudienceSnafu {
            audience: claims.audience.clone(),
        }
        .fail();
    }

    Ok(claims.subject.clone())
}

#[cfg(test)]
mod access_token_tests {
    use super::*;

    #[test]
    fn verify_minted_token() {
        let username = Username::new("johndoe").unwrap(/* known good */);
        let key_id = KeyId::new("keyid:20250817").unwrap(/* known good */);
        // With apologies to J.R.R. Tolkien, but I needed 64 bytes exactly.
        let signing_key = SigningKey::new(b"All that is gold does not glitter-- Not all who wander are lost.".to_vec()).unwrap(/* known good */);
        let issuer = "blog.example.com";

        let token_result = mint_token(
            &username,
            &key_id,
            &signing_key,
            issuer,
            &Duration::seconds(300),
        );
        assert!(token_result.is_ok());

        let token = token_result.unwrap(/* known good */);

        let keys = SigningKeys::from([(key_id, signing_key)]);

        let verify_result = verify_token(&token, &keys, issuer);
        assert!(verify_result.is_ok());

        let verified = verify_result.unwrap(/* known good */);
        assert_eq!(username, verified);
    }

    #[test]
    fn reject_expired_token() {
        let username = Username::new("johndoe").unwrap(/* known good */);
        let key_id = KeyId::new("keyid:20250817").unwrap(/* known good */);
        let signing_key = SigningKey::new(b"All that is gold does not glitter-- Not all who wander are lost.".to_vec()).unwrap(/* known good */);
        let issuer = "blog.example.com";

        let token = mint_token(
            &username,
            &key_id,
            &signing_key,
            issuer,
            &Duration::seconds(-300),
        )
        .unwrap(/* known good */);
        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert!(matches!(
            verify_token(&token, &keys, issuer),
            Err(Error::Expired { .. })
        ));
    }

    #[test]
    fn reject_wrong_issuer() {
        let username = Username::new("johndoe").unwrap(/* known good */);
        let key_id = KeyId::new("keyid:20250817").unwrap(/* known good */);
        let signing_key = SigningKey::new(b"All that is gold does not glitter-- Not all who wander are lost.".to_vec()).unwrap(/* known good */);

        let token = mint_token(
            &username,
            &key_id,
            &signing_key,
            "blog.example.com",
            &Duration::seconds(300),
        )
        .unwrap(/* known good */);
        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert!(matches!(
            verify_token(&token, &keys, "blag.example.com"),
            Err(Error::UnknownIssuer { .. })
        ));
    }

    #[test]
    fn key_lengths_are_enforced() {
        assert!(SigningKey::new(vec![0; 63]).is_err());
        assert!(SigningKey::new(vec![0; 64]).is_ok());
        assert!(KeyId::new("keyid:2025-08-17").is_ok());
        assert!(KeyId::new("2025-08-17").is_err());
        // Undersized keys are caught at configuration-parse time, too.
        assert!(serde_json::from_str::<SigningKey>("[0,1,2]").is_err());
        let sixty_four = format!("[{}]", vec!["0"; 64].join(","));
        assert!(serde_json::from_str::<SigningKey>(&sixty_four).is_ok());
    }
}
