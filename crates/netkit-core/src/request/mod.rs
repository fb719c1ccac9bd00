//! Declarative request descriptions and their conversion into wire requests.
//!
//! # Design
//!
//! - `HttpRequest` is what callers describe; `WireRequest` is what transports
//!   execute. `HttpRequest::prepare` is the only bridge between the two.
//! - Encoding is deterministic: query pairs and form bodies keep insertion order.
//! - Encryption is delegated to an injected [`BodyEncryptor`].

pub mod multipart;

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use url::form_urlencoded;

use crate::error::RequestBuildError;
use crate::model::AuthDetail;
use crate::service::BodyEncryptor;

/// Timeout applied when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `application/x-www-form-urlencoded`.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `application/json`.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Key length required by AES-256.
pub const AES256_KEY_LEN: usize = 32;

/// IV length required by AES-256 in CBC mode.
pub const AES256_IV_LEN: usize = 16;

/// Query characters left unescaped by [`QueryEncoding::PercentEncoded`]: the
/// RFC 3986 query set without general and sub delimiters.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b'?');

/// HTTP verbs accepted in request descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET.
    Get,
    /// HEAD.
    Head,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
    /// CONNECT.
    Connect,
    /// OPTIONS.
    Options,
    /// PATCH.
    Patch,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Connect => Self::CONNECT,
            HttpMethod::Options => Self::OPTIONS,
            HttpMethod::Patch => Self::PATCH,
        }
    }
}

/// How query parameters are attached to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEncoding {
    /// `application/x-www-form-urlencoded` pairs in the URL query.
    #[default]
    Default,
    /// RFC 3986 percent-encoding with delimiters escaped.
    PercentEncoded,
    /// Pairs sent as a form body instead of the URL query.
    FormBody,
}

/// How a structured body is serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// JSON object.
    #[default]
    Json,
    /// `key=value` pairs joined by `&`.
    Form,
}

/// Body encryption descriptor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncryption {
    /// AES-256 with a 32-byte key and 16-byte initial vector.
    Aes256 {
        /// Key material.
        key: String,
        /// Initial vector.
        iv: String,
    },
}

impl BodyEncryption {
    /// Check key and IV lengths.
    ///
    /// # Errors
    ///
    /// Returns [`RequestBuildError::InvalidEncryptionParameters`] on a length
    /// mismatch.
    pub fn validate(&self) -> Result<(), RequestBuildError> {
        match self {
            Self::Aes256 { key, iv } => {
                if key.len() != AES256_KEY_LEN {
                    return Err(RequestBuildError::InvalidEncryptionParameters {
                        field: "key",
                        expected: AES256_KEY_LEN,
                        actual: key.len(),
                    });
                }
                if iv.len() != AES256_IV_LEN {
                    return Err(RequestBuildError::InvalidEncryptionParameters {
                        field: "iv",
                        expected: AES256_IV_LEN,
                        actual: iv.len(),
                    });
                }
                Ok(())
            }
        }
    }
}

impl Debug for BodyEncryption {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256 { .. } => formatter.write_str("Aes256 { .. }"),
        }
    }
}

/// Declarative description of an HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Scheme, host and optional base path.
    pub base_url: String,
    /// Path appended verbatim to `base_url`.
    pub path: String,
    /// HTTP verb.
    pub method: HttpMethod,
    /// Request headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Query attachment strategy.
    pub query_encoding: QueryEncoding,
    /// Structured body.
    pub body: Option<Map<String, Value>>,
    /// Body serialisation strategy.
    pub body_encoding: BodyEncoding,
    /// Per-request timeout; [`DEFAULT_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    /// Optional body encryption.
    pub encryption: Option<BodyEncryption>,
    /// Authentication settings used when the server challenges.
    pub auth: Option<AuthDetail>,
    /// Retry budget override for this request.
    pub max_retry: Option<u32>,
}

impl HttpRequest {
    /// Start a description for `method` against `base_url` + `path`.
    #[must_use]
    pub fn new(method: HttpMethod, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method,
            headers: Vec::new(),
            query: Vec::new(),
            query_encoding: QueryEncoding::Default,
            body: None,
            body_encoding: BodyEncoding::Json,
            timeout: None,
            encryption: None,
            auth: None,
            max_retry: None,
        }
    }

    /// GET shorthand.
    #[must_use]
    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, base_url, path)
    }

    /// POST shorthand.
    #[must_use]
    pub fn post(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, base_url, path)
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Select the query encoding.
    #[must_use]
    pub fn query_encoding(mut self, encoding: QueryEncoding) -> Self {
        self.query_encoding = encoding;
        self
    }

    /// Set a structured body and its encoding.
    #[must_use]
    pub fn body(mut self, body: Map<String, Value>, encoding: BodyEncoding) -> Self {
        self.body = Some(body);
        self.body_encoding = encoding;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Encrypt the encoded body.
    #[must_use]
    pub fn encryption(mut self, encryption: BodyEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Attach authentication settings.
    #[must_use]
    pub fn auth(mut self, auth: AuthDetail) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// Build the wire request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestBuildError`] when the URL does not parse, a header is
    /// invalid, the body cannot be encoded, or encryption fails.
    pub fn prepare(
        &self,
        encryptor: Option<&dyn BodyEncryptor>,
    ) -> Result<WireRequest, RequestBuildError> {
        let url_text = format!("{}{}", self.base_url, self.path);
        let mut url = Url::parse(&url_text).map_err(|source| RequestBuildError::InvalidUrl {
            url: url_text.clone(),
            source,
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            headers.append(name, value);
        }

        let mut body = None;
        if !self.query.is_empty() {
            match self.query_encoding {
                QueryEncoding::Default => {
                    url.query_pairs_mut().extend_pairs(&self.query);
                }
                QueryEncoding::PercentEncoded => {
                    url.set_query(Some(&percent_encode_pairs(&self.query)));
                }
                QueryEncoding::FormBody => {
                    let pairs = self.query.iter().map(|(k, v)| (k.as_str(), v.clone()));
                    body = Some(form_encode(pairs));
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                }
            }
        }

        if let Some(fields) = &self.body {
            let (encoded, content_type) = match self.body_encoding {
                BodyEncoding::Json => (
                    serde_json::to_vec(fields)
                        .map_err(|source| RequestBuildError::BodyEncoding { source })?,
                    JSON_CONTENT_TYPE,
                ),
                BodyEncoding::Form => (
                    form_encode(fields.iter().map(|(k, v)| (k.as_str(), render_form_value(v)))),
                    FORM_CONTENT_TYPE,
                ),
            };
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            body = Some(encoded);
        }

        if let (Some(encryption), Some(plain)) = (&self.encryption, body.as_ref()) {
            encryption.validate()?;
            let encryptor = encryptor.ok_or(RequestBuildError::Encryption {
                reason: "encryptor_missing",
            })?;
            let sealed = encryptor
                .encrypt(encryption, plain)
                .map_err(|_| RequestBuildError::Encryption {
                    reason: "encryptor_failed",
                })?;
            body = Some(sealed);
        }

        Ok(WireRequest {
            method: self.method.into(),
            url,
            headers,
            body,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}

/// Finished request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    /// HTTP verb.
    pub method: Method,
    /// Absolute URL including the query.
    pub url: Url,
    /// Header map.
    pub headers: HeaderMap,
    /// Encoded (and possibly encrypted) body.
    pub body: Option<Vec<u8>>,
    /// Transport timeout.
    pub timeout: Duration,
}

impl WireRequest {
    /// Insert every header from `defaults` that the request does not set.
    pub fn apply_default_headers(&mut self, defaults: &HeaderMap) {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Parse a header pair into typed values.
///
/// # Errors
///
/// Returns [`RequestBuildError::InvalidHeader`] when the name or value is not
/// valid HTTP.
pub fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), RequestBuildError> {
    let invalid = || RequestBuildError::InvalidHeader {
        name: name.to_string(),
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}

fn percent_encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(name, QUERY_COMPONENT),
                utf8_percent_encode(value, QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn form_encode<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> Vec<u8> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, &value);
    }
    serializer.finish().into_bytes()
}

fn render_form_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
