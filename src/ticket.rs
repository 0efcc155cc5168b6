//! htsget ticket negotiation.
//!
//! A ticket request is a GET against the dataset URL with htsget query
//! parameters merged into whatever query string the URL already carries.
//! The JSON response describes where the actual bytes live: a list of
//! sub-URLs with optional per-URL request headers and an optional data
//! class.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Data formats this client requests. Reads formats only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    #[default]
    Bam,
    Cram,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Bam => "BAM",
            Format::Cram => "CRAM",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Format::Bam => "bam",
            Format::Cram => "cram",
        }
    }
}

/// Data class - header only or full data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Body,
    Header,
}

/// One sub-URL of a ticket, with the request headers the server asks us to
/// send when fetching it.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlObject {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub class: Option<DataClass>,
}

/// A parsed ticket: where to fetch the data, plus the format and md5 the
/// server reports as authoritative.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticket {
    pub urls: Vec<UrlObject>,
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub md5: Option<String>,
}

/// Query parameters for one ticket request.
#[derive(Debug, Clone, Default)]
pub struct TicketRequest {
    pub format: Option<Format>,
    pub class: Option<DataClass>,
    pub reference_name: Option<String>,
    pub reference_md5: Option<String>,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub notags: Option<Vec<String>>,
}

impl TicketRequest {
    pub fn header_only(format: Option<Format>) -> Self {
        Self {
            format,
            class: Some(DataClass::Header),
            ..Self::default()
        }
    }
}

/// Issues ticket requests against an htsget endpoint.
#[derive(Debug, Clone)]
pub struct TicketClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl TicketClient {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build the request URL for `params` against `base`.
    ///
    /// Query parameters already on `base` are preserved; keys supplied by
    /// `params` replace any existing value. The only data class that may be
    /// requested explicitly is `header`.
    pub fn request_url(base: &Url, params: &TicketRequest) -> Result<Url> {
        if let Some(class) = params.class {
            if class != DataClass::Header {
                return Err(Error::InvalidInput(
                    "ticket 'class' parameter must be 'header'".to_string(),
                ));
            }
        }

        let mut pairs: Vec<(String, String)> = base
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut set = |key: &str, value: String| {
            pairs.retain(|(existing, _)| existing != key);
            pairs.push((key.to_string(), value));
        };

        if let Some(format) = params.format {
            set("format", format.as_str().to_string());
        }
        if params.class == Some(DataClass::Header) {
            set("class", "header".to_string());
        }
        if let Some(name) = &params.reference_name {
            set("referenceName", name.clone());
        }
        if let Some(md5) = &params.reference_md5 {
            set("referenceMD5", md5.clone());
        }
        if let Some(start) = params.start {
            set("start", start.to_string());
        }
        if let Some(end) = params.end {
            set("end", end.to_string());
        }
        if let Some(tags) = &params.tags {
            set("tags", tags.join(","));
        }
        if let Some(notags) = &params.notags {
            set("notags", notags.join(","));
        }

        let mut url = base.clone();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())));
        }

        Ok(url)
    }

    /// Request a ticket. Non-2xx responses fail with [`Error::TicketHttp`];
    /// a body without a usable ticket object fails with
    /// [`Error::TicketProtocol`].
    pub async fn request(&self, base: &Url, params: &TicketRequest) -> Result<Ticket> {
        let url = Self::request_url(base, params)?;
        tracing::debug!(%url, "requesting htsget ticket");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TicketHttp {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        parse_ticket(body)
    }
}

/// Accepts both the `{"htsget": {...}}` wrapper and the legacy bare ticket
/// object.
fn parse_ticket(body: serde_json::Value) -> Result<Ticket> {
    let object = match body.get("htsget") {
        Some(inner) => inner.clone(),
        None => body,
    };

    if object.get("urls").is_none() {
        return Err(Error::TicketProtocol(
            "response is missing 'urls'".to_string(),
        ));
    }

    serde_json::from_value(object)
        .map_err(|e| Error::TicketProtocol(format!("malformed ticket: {e}")))
}
