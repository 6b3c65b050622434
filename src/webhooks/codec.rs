//! Media type registry for the conversion webhook.
//!
//! The API server may send and accept either JSON or YAML. The registry is
//! built once at startup and shared read-only between handlers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A body encoding the conversion webhook understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Json,
    Yaml,
}

impl MediaType {
    /// Top-level type and subtype, e.g. `("application", "json")`.
    pub fn parts(&self) -> (&'static str, &'static str) {
        match self {
            MediaType::Json => ("application", "json"),
            MediaType::Yaml => ("application", "yaml"),
        }
    }

    /// Value for a `Content-Type` header.
    pub fn essence(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Yaml => "application/yaml",
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Registered codecs in preference order.
#[derive(Clone, Debug)]
pub struct Codecs {
    media_types: Vec<MediaType>,
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `type/subtype; params` into its lowercase type and subtype.
fn split_media_range(value: &str) -> Option<(String, String)> {
    let essence = value.split(';').next().unwrap_or_default().trim();
    let (kind, subtype) = essence.split_once('/')?;
    let (kind, subtype) = (kind.trim(), subtype.trim());
    if kind.is_empty() || subtype.is_empty() {
        return None;
    }
    Some((kind.to_ascii_lowercase(), subtype.to_ascii_lowercase()))
}

/// Quality factor of an Accept clause. Malformed values count as 1.
fn quality(clause: &str) -> f32 {
    clause
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, value)| value.trim().parse::<f32>().ok())
        .unwrap_or(1.0)
}

impl Codecs {
    /// JSON first, then YAML.
    pub fn new() -> Self {
        Self {
            media_types: vec![MediaType::Json, MediaType::Yaml],
        }
    }

    /// Codec for a request `Content-Type`. Parameters such as `charset` are
    /// ignored; type and subtype must match exactly.
    pub fn for_content_type(&self, content_type: Option<&str>) -> Option<MediaType> {
        let (kind, subtype) = split_media_range(content_type?)?;
        self.media_types
            .iter()
            .copied()
            .find(|m| m.parts() == (kind.as_str(), subtype.as_str()))
    }

    /// Codec for a response given the request `Accept` header.
    ///
    /// An absent or blank header selects JSON. Clauses are tried in
    /// descending q order (ties keep header order); `q=0` excludes a clause.
    /// `None` means nothing acceptable is registered.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<MediaType> {
        let accept = accept.map(str::trim).unwrap_or_default();
        if accept.is_empty() {
            return Some(MediaType::Json);
        }

        let mut clauses: Vec<(f32, String, String)> = accept
            .split(',')
            .filter_map(|clause| {
                let q = quality(clause);
                let (kind, subtype) = split_media_range(clause)?;
                (q > 0.0).then_some((q, kind, subtype))
            })
            .collect();
        clauses.sort_by(|a, b| b.0.total_cmp(&a.0));

        clauses.iter().find_map(|(_, kind, subtype)| {
            self.media_types.iter().copied().find(|m| {
                let (t, s) = m.parts();
                match (kind.as_str(), subtype.as_str()) {
                    ("*", "*") => true,
                    (k, "*") => k == t,
                    (k, sub) => k == t && sub == s,
                }
            })
        })
    }

    pub fn decode<T: DeserializeOwned>(
        &self,
        media_type: MediaType,
        body: &[u8],
    ) -> Result<T, CodecError> {
        Ok(match media_type {
            MediaType::Json => serde_json::from_slice(body)?,
            MediaType::Yaml => serde_yaml::from_slice(body)?,
        })
    }

    pub fn encode<T: Serialize>(
        &self,
        media_type: MediaType,
        value: &T,
    ) -> Result<Vec<u8>, CodecError> {
        Ok(match media_type {
            MediaType::Json => serde_json::to_vec(value)?,
            MediaType::Yaml => serde_yaml::to_string(value)?.into_bytes(),
        })
    }
}
