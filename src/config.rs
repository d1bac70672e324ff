//! Engine configuration and SSH algorithm preferences.
//!
//! [`EngineConfig`] carries the timing knobs shared by the session manager and
//! the dispatcher. The algorithm lists favour broad compatibility: the devices
//! driven here are pre-enrolled infrastructure, many of them running old SSH
//! stacks that only speak CBC ciphers and SHA-1 key exchange.

use std::borrow::Cow;
use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, compression, kex, mac};
use serde::{Deserialize, Serialize};

/// Default time a single quiescent read may take.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for TCP connect plus SSH handshake.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between keep-alive probes on an idle session.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Timing and buffering settings for the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-read timeout used when a request does not carry one.
    #[serde(with = "secs")]
    pub read_timeout: Duration,
    /// Bound on dialing and authenticating a new transport.
    #[serde(with = "secs")]
    pub dial_timeout: Duration,
    /// Keep-alive period; `None` disables the probe.
    #[serde(with = "opt_secs")]
    pub keepalive_interval: Option<Duration>,
    /// Capacity of the transport I/O channels.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from JSON, filling unspecified fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

/// Key exchange algorithms in order of preference.
///
/// Modern curves first, then the SHA-1 Diffie-Hellman groups older
/// firewalls still require.
pub const KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
];

/// Ciphers including the CBC modes legacy devices negotiate.
pub const CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

/// MAC algorithms, ETM variants preferred.
pub const MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

/// Compression methods.
pub const COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Host key algorithms, including RSA/SHA-1 and DSA.
pub const KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

/// Algorithm preference handed to the SSH client.
pub fn preferred_algorithms() -> Preferred {
    Preferred {
        kex: Cow::Borrowed(KEX_ORDER),
        key: Cow::Borrowed(KEY_TYPES),
        cipher: Cow::Borrowed(CIPHERS),
        mac: Cow::Borrowed(MAC_ALGORITHMS),
        compression: Cow::Borrowed(COMPRESSION_ALGORITHMS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"read_timeout": 12}"#).expect("parse");
        assert_eq!(config.read_timeout, Duration::from_secs(12));
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(config.keepalive_interval, Some(DEFAULT_KEEPALIVE_INTERVAL));
    }

    #[test]
    fn keepalive_can_be_disabled() {
        let config = EngineConfig::from_json(r#"{"keepalive_interval": null}"#).expect("parse");
        assert_eq!(config.keepalive_interval, None);
    }

    #[test]
    fn legacy_cbc_ciphers_are_offered() {
        assert!(CIPHERS.contains(&cipher::AES_128_CBC));
        assert!(KEX_ORDER.contains(&kex::DH_G1_SHA1));
    }
}
