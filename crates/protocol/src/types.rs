use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of a transfer request.
///
/// `reput`/`reget` are accepted as aliases: callers use them to retry a
/// batch, which the bridge treats exactly like a fresh `put`/`get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    /// Local file(s) to the object store.
    #[serde(rename = "put", alias = "reput")]
    Put,
    /// Object(s) from the store to the local filesystem.
    #[serde(rename = "get", alias = "reget")]
    Get,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get => "get",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy type selector, numbered the way legacy callers send it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ProxyKind {
    #[default]
    None,
    Http,
    Socks5,
}

impl From<i32> for ProxyKind {
    fn from(v: i32) -> Self {
        match v {
            1 => Self::Http,
            2 => Self::Socks5,
            _ => Self::None,
        }
    }
}

impl From<ProxyKind> for i32 {
    fn from(kind: ProxyKind) -> Self {
        match kind {
            ProxyKind::None => 0,
            ProxyKind::Http => 1,
            ProxyKind::Socks5 => 2,
        }
    }
}

/// Snapshot returned by `GetStatus`.
///
/// Rendered on the wire as three space-separated tokens:
/// `"<speed> <transferred> <finished>"` where `finished` is `0` or `1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Bytes per second, rounded.
    pub speed: u64,
    /// Cumulative transferred bytes.
    pub transferred: u64,
    pub finished: bool,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.speed,
            self.transferred,
            if self.finished { "1" } else { "0" }
        )
    }
}

/// Error returned when a status line is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status line: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for TransferStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseStatusError(s.to_string());
        let mut parts = s.split_whitespace();
        let speed = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let transferred = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let finished = match parts.next() {
            Some("0") => false,
            Some("1") => true,
            _ => return Err(err()),
        };
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self {
            speed,
            transferred,
            finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_mode_aliases() {
        let m: TransferMode = serde_json::from_str("\"reput\"").unwrap();
        assert_eq!(m, TransferMode::Put);
        let m: TransferMode = serde_json::from_str("\"reget\"").unwrap();
        assert_eq!(m, TransferMode::Get);
        assert_eq!(serde_json::to_string(&TransferMode::Get).unwrap(), "\"get\"");
    }

    #[test]
    fn transfer_mode_rejects_unknown() {
        assert!(serde_json::from_str::<TransferMode>("\"mirror\"").is_err());
    }

    #[test]
    fn proxy_kind_from_legacy_number() {
        let k: ProxyKind = serde_json::from_str("1").unwrap();
        assert_eq!(k, ProxyKind::Http);
        let k: ProxyKind = serde_json::from_str("7").unwrap();
        assert_eq!(k, ProxyKind::None);
        assert_eq!(serde_json::to_string(&ProxyKind::Socks5).unwrap(), "2");
    }

    #[test]
    fn status_line_format() {
        let status = TransferStatus {
            speed: 0,
            transferred: 100,
            finished: true,
        };
        assert_eq!(status.to_string(), "0 100 1");
        assert_eq!(TransferStatus::default().to_string(), "0 0 0");
    }

    #[test]
    fn status_line_parse() {
        let status: TransferStatus = "2048 4096 0".parse().unwrap();
        assert_eq!(status.speed, 2048);
        assert_eq!(status.transferred, 4096);
        assert!(!status.finished);
    }

    #[test]
    fn status_line_rejects_bad_flag() {
        assert!("1 2 3".parse::<TransferStatus>().is_err());
        assert!("1 2".parse::<TransferStatus>().is_err());
        assert!("1 2 1 extra".parse::<TransferStatus>().is_err());
    }
}
