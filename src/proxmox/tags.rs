//! Service tag stored in a guest's description field.
//!
//! Format: `Framework:<key>|Port:<port>`. Listing reconstructs deployments
//! from this string, so the encoding must stay stable. Decoding accepts
//! whitespace around keys and values and ignores unknown keys, which covers
//! tags written by older tooling (`Framework: x|Port: 8000`).

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTag {
    pub framework: String,
    pub port: u16,
}

impl ServiceTag {
    pub fn new(framework: impl Into<String>, port: u16) -> Self {
        Self {
            framework: framework.into(),
            port,
        }
    }

    pub fn encode(&self) -> String {
        format!("Framework:{}|Port:{}", self.framework, self.port)
    }

    pub fn decode(tag: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        };

        let mut framework: Option<String> = None;
        let mut port: Option<u16> = None;

        for segment in tag.trim().split('|') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment
                .split_once(':')
                .ok_or_else(|| malformed("segment without ':'"))?;
            let value = value.trim();

            match key.trim() {
                "Framework" => {
                    if framework.is_some() {
                        return Err(malformed("duplicate Framework"));
                    }
                    if value.is_empty() {
                        return Err(malformed("empty Framework"));
                    }
                    framework = Some(value.to_string());
                }
                "Port" => {
                    if port.is_some() {
                        return Err(malformed("duplicate Port"));
                    }
                    let parsed: u16 = value
                        .parse()
                        .map_err(|_| malformed("Port is not a number"))?;
                    if parsed == 0 {
                        return Err(malformed("Port is zero"));
                    }
                    port = Some(parsed);
                }
                _ => {}
            }
        }

        Ok(Self {
            framework: framework.ok_or_else(|| malformed("missing Framework"))?,
            port: port.ok_or_else(|| malformed("missing Port"))?,
        })
    }
}

impl std::fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
