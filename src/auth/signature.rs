//! HTTP message signatures (RFC 9421 subset)
//!
//! Only what AudioConnector clients actually send is supported:
//! - a `Signature-Input` dictionary whose members are inner lists of quoted
//!   component names followed by `keyid`, `nonce`, `alg`, `created` and
//!   `expires` parameters
//! - a `Signature` dictionary with byte-sequence members (`:base64:`)
//! - the `hmac-sha256` algorithm
//!
//! The signature base is built exactly as RFC 9421 section 2.5 describes:
//! one `"name": value` line per covered component followed by the
//! `"@signature-params"` line, joined with `\n`.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::secrets::SecretBytes;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "signature";
pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
pub const HMAC_SHA256: &str = "hmac-sha256";

const AUTHORITY_COMPONENT: &str = "@authority";
const SIGNATURE_PARAMS_COMPONENT: &str = "@signature-params";

/// Classification of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A required input is missing or too weak (API key header, nonce, coverage)
    Precondition,
    /// The signature headers are malformed or inconsistent
    Invalid,
    /// The signature is older than the allowed age or past `expires`
    Expired,
    /// The signature `keyid` does not match the API key header
    KeyMismatch,
    /// The key identifier is not known to the secret resolver
    BadKey,
    /// The declared algorithm is not supported
    UnsupportedAlgorithm,
    /// The signature does not match the request
    Unauthorized,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Precondition => "precondition",
            FailureKind::Invalid => "invalid",
            FailureKind::Expired => "expired",
            FailureKind::KeyMismatch => "key-mismatch",
            FailureKind::BadKey => "bad-key",
            FailureKind::UnsupportedAlgorithm => "unsupported-algorithm",
            FailureKind::Unauthorized => "unauthorized",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl VerifyFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Invalid, message)
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of [`verify_signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Verified,
    /// Neither `Signature` nor `Signature-Input` was present
    Unsigned,
    Failed(VerifyFailure),
}

/// Parameters of one `Signature-Input` member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameters {
    pub label: String,
    pub components: Vec<String>,
    pub keyid: Option<String>,
    pub nonce: Option<String>,
    pub alg: Option<String>,
    pub created: Option<u64>,
    pub expires: Option<u64>,
    /// Serialized inner list and parameters, used verbatim in the signature base
    serialized: String,
}

impl SignatureParameters {
    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

/// Answer of a [`KeyResolver`].
pub enum KeyResolution {
    GoodKey(SecretBytes),
    BadKey,
    Failed(VerifyFailure),
}

/// Resolves the verification key once the signature parameters are known.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve_key(&self, parameters: &SignatureParameters) -> KeyResolution;
}

/// Verification policy.
pub struct VerifyOptions<'a> {
    /// Components every accepted signature must cover
    pub required_components: &'a [&'a str],
    /// Signatures whose `created` is older than this are rejected
    pub max_signature_age: Duration,
    pub now: SystemTime,
}

/// Verify the HTTP message signature carried by `headers`.
///
/// `derived` resolves derived components (names starting with `@`) other than
/// `@authority`, which is read from the `Host` header. Returning `None` means
/// the component is not available and fails verification.
pub async fn verify_signature(
    headers: &HeaderMap,
    options: &VerifyOptions<'_>,
    derived: &(dyn Fn(&str) -> Option<String> + Send + Sync),
    resolver: &dyn KeyResolver,
) -> VerifyResult {
    match verify_inner(headers, options, derived, resolver).await {
        Ok(result) => result,
        Err(failure) => VerifyResult::Failed(failure),
    }
}

async fn verify_inner(
    headers: &HeaderMap,
    options: &VerifyOptions<'_>,
    derived: &(dyn Fn(&str) -> Option<String> + Send + Sync),
    resolver: &dyn KeyResolver,
) -> Result<VerifyResult, VerifyFailure> {
    let signature_input = header_value(headers, SIGNATURE_INPUT_HEADER);
    let signature = header_value(headers, SIGNATURE_HEADER);

    let (signature_input, signature) = match (signature_input, signature) {
        (None, None) => return Ok(VerifyResult::Unsigned),
        (Some(input), Some(signature)) => (input, signature),
        (Some(_), None) => {
            return Err(VerifyFailure::invalid(
                "\"Signature-Input\" present without \"Signature\"",
            ));
        }
        (None, Some(_)) => {
            return Err(VerifyFailure::invalid(
                "\"Signature\" present without \"Signature-Input\"",
            ));
        }
    };

    let inputs = parse_signature_input(&signature_input)?;
    let signatures = parse_signature(&signature)?;

    // Verify the first labelled input that has a matching signature
    let (parameters, signature_bytes) = inputs
        .into_iter()
        .find_map(|params| {
            signatures
                .iter()
                .find(|(label, _)| *label == params.label)
                .map(|(_, bytes)| (params, bytes.clone()))
        })
        .ok_or_else(|| VerifyFailure::invalid("No signature matches any signature input label"))?;

    for required in options.required_components {
        if !parameters
            .components
            .iter()
            .any(|component| component.eq_ignore_ascii_case(required))
        {
            return Err(VerifyFailure::new(
                FailureKind::Precondition,
                format!("Signature does not cover required component \"{required}\""),
            ));
        }
    }

    if let Some(alg) = &parameters.alg
        && !alg.eq_ignore_ascii_case(HMAC_SHA256)
    {
        return Err(VerifyFailure::new(
            FailureKind::UnsupportedAlgorithm,
            format!("Unsupported signature algorithm \"{alg}\""),
        ));
    }

    check_signature_age(&parameters, options)?;

    let secret = match resolver.resolve_key(&parameters).await {
        KeyResolution::GoodKey(secret) => secret,
        KeyResolution::BadKey => {
            return Err(VerifyFailure::new(
                FailureKind::BadKey,
                "Unable to verify signature with the provided key",
            ));
        }
        KeyResolution::Failed(failure) => return Err(failure),
    };

    let base = signature_base(&parameters, |name| {
        if name.eq_ignore_ascii_case(AUTHORITY_COMPONENT) {
            header_value(headers, "host").map(|host| host.to_ascii_lowercase())
        } else if name.starts_with('@') {
            derived(name)
        } else {
            header_value(headers, name)
        }
    })?;

    let mut mac = HmacSha256::new_from_slice(&secret)
        .map_err(|_| VerifyFailure::new(FailureKind::BadKey, "Invalid key material"))?;
    mac.update(base.as_bytes());

    if mac.verify_slice(&signature_bytes).is_ok() {
        Ok(VerifyResult::Verified)
    } else {
        Err(VerifyFailure::new(
            FailureKind::Unauthorized,
            "Signature verification failed",
        ))
    }
}

fn check_signature_age(
    parameters: &SignatureParameters,
    options: &VerifyOptions<'_>,
) -> Result<(), VerifyFailure> {
    let now = options
        .now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let max_age = options.max_signature_age.as_secs();

    let created = parameters.created.ok_or_else(|| {
        VerifyFailure::new(
            FailureKind::Precondition,
            "Missing \"created\" signature parameter",
        )
    })?;

    if created > now.saturating_add(max_age) {
        return Err(VerifyFailure::invalid(
            "Signature \"created\" parameter is in the future",
        ));
    }
    if now.saturating_sub(created) > max_age {
        return Err(VerifyFailure::new(
            FailureKind::Expired,
            format!("Signature is older than {max_age} seconds"),
        ));
    }
    if let Some(expires) = parameters.expires
        && now > expires
    {
        return Err(VerifyFailure::new(
            FailureKind::Expired,
            "Signature has expired",
        ));
    }

    Ok(())
}

/// Build the RFC 9421 signature base for `parameters`.
fn signature_base<F>(parameters: &SignatureParameters, resolve: F) -> Result<String, VerifyFailure>
where
    F: Fn(&str) -> Option<String>,
{
    let mut lines = Vec::with_capacity(parameters.components.len() + 1);

    for component in &parameters.components {
        let name = component.to_ascii_lowercase();
        let value = resolve(&name).ok_or_else(|| {
            VerifyFailure::invalid(format!("Component \"{name}\" is not available"))
        })?;
        lines.push(format!("\"{name}\": {value}"));
    }
    lines.push(format!(
        "\"{SIGNATURE_PARAMS_COMPONENT}\": {}",
        parameters.serialized
    ));

    Ok(lines.join("\n"))
}

/// Canonical value of a header field: all instances trimmed and joined with `", "`.
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

// =============================================================================
// Structured field parsing
// =============================================================================

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn key(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '*')
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn bare_item(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || "-_.*:/%!#$&'+^`|~".contains(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn string(&mut self) -> Result<String, VerifyFailure> {
        if !self.eat('"') {
            return Err(VerifyFailure::invalid("Expected a quoted string"));
        }
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c @ ('"' | '\\')) => out.push(c),
                    _ => return Err(VerifyFailure::invalid("Invalid escape in quoted string")),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(VerifyFailure::invalid("Unterminated quoted string")),
            }
        }
    }
}

/// Split a structured-field dictionary into its members, honouring quotes and parentheses.
fn split_members(value: &str) -> Vec<&str> {
    let mut members = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                members.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    let last = value[start..].trim();
    if !last.is_empty() {
        members.push(last);
    }
    members
}

/// Parse a `Signature-Input` header value.
pub fn parse_signature_input(value: &str) -> Result<Vec<SignatureParameters>, VerifyFailure> {
    let members = split_members(value);
    if members.is_empty() {
        return Err(VerifyFailure::invalid("Empty \"Signature-Input\" header"));
    }
    members.into_iter().map(parse_input_member).collect()
}

fn parse_input_member(member: &str) -> Result<SignatureParameters, VerifyFailure> {
    let mut parser = Parser::new(member);

    let label = parser.key().to_string();
    if label.is_empty() || !parser.eat('=') {
        return Err(VerifyFailure::invalid("Malformed \"Signature-Input\" member"));
    }

    let serialized_start = parser.pos;
    if !parser.eat('(') {
        return Err(VerifyFailure::invalid(
            "\"Signature-Input\" member is not an inner list",
        ));
    }

    let mut components = Vec::new();
    loop {
        parser.skip_spaces();
        if parser.eat(')') {
            break;
        }
        if parser.is_done() {
            return Err(VerifyFailure::invalid("Unterminated component list"));
        }
        components.push(parser.string()?);
    }

    let mut parameters = SignatureParameters {
        label,
        components,
        keyid: None,
        nonce: None,
        alg: None,
        created: None,
        expires: None,
        serialized: String::new(),
    };

    while parser.eat(';') {
        let key = parser.key();
        if key.is_empty() {
            return Err(VerifyFailure::invalid("Empty signature parameter name"));
        }
        if !parser.eat('=') {
            // Boolean parameters carry nothing we use
            continue;
        }
        if parser.peek() == Some('"') {
            let value = parser.string()?;
            match key {
                "keyid" => parameters.keyid = Some(value),
                "nonce" => parameters.nonce = Some(value),
                "alg" => parameters.alg = Some(value),
                "created" | "expires" => {
                    return Err(VerifyFailure::invalid(format!(
                        "Signature parameter \"{key}\" must be an integer"
                    )));
                }
                _ => {}
            }
        } else if parser.eat('?') {
            if !matches!(parser.bare_item(), "0" | "1") {
                return Err(VerifyFailure::invalid(format!(
                    "Invalid boolean for signature parameter \"{key}\""
                )));
            }
            if matches!(key, "created" | "expires" | "keyid" | "nonce" | "alg") {
                return Err(VerifyFailure::invalid(format!(
                    "Signature parameter \"{key}\" must not be a boolean"
                )));
            }
        } else {
            let item = parser.bare_item();
            if item.is_empty() {
                return Err(VerifyFailure::invalid(format!(
                    "Missing value for signature parameter \"{key}\""
                )));
            }
            match key {
                "created" | "expires" => {
                    let timestamp = item.parse::<u64>().map_err(|_| {
                        VerifyFailure::invalid(format!(
                            "Signature parameter \"{key}\" must be an integer"
                        ))
                    })?;
                    if key == "created" {
                        parameters.created = Some(timestamp);
                    } else {
                        parameters.expires = Some(timestamp);
                    }
                }
                "keyid" | "nonce" | "alg" => {
                    return Err(VerifyFailure::invalid(format!(
                        "Signature parameter \"{key}\" must be a string"
                    )));
                }
                _ => {}
            }
        }
    }

    if !parser.is_done() {
        return Err(VerifyFailure::invalid(
            "Unexpected trailing characters in \"Signature-Input\"",
        ));
    }

    parameters.serialized = member[serialized_start..].to_string();
    Ok(parameters)
}

/// Parse a `Signature` header value into `(label, bytes)` pairs.
pub fn parse_signature(value: &str) -> Result<Vec<(String, Vec<u8>)>, VerifyFailure> {
    let members = split_members(value);
    if members.is_empty() {
        return Err(VerifyFailure::invalid("Empty \"Signature\" header"));
    }

    members
        .into_iter()
        .map(|member| {
            let (label, rest) = member
                .split_once('=')
                .ok_or_else(|| VerifyFailure::invalid("Malformed \"Signature\" member"))?;
            let encoded = rest
                .trim()
                .strip_prefix(':')
                .and_then(|rest| rest.strip_suffix(':'))
                .ok_or_else(|| {
                    VerifyFailure::invalid("\"Signature\" member is not a byte sequence")
                })?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| VerifyFailure::invalid(format!("Invalid signature encoding: {e}")))?;
            Ok((label.trim().to_string(), bytes))
        })
        .collect()
}

// =============================================================================
// Signing (client side)
// =============================================================================

/// Parameters for producing a signature with [`sign_request`].
#[derive(Debug, Clone)]
pub struct SigningParameters {
    pub label: String,
    pub components: Vec<String>,
    pub keyid: String,
    pub nonce: String,
    pub created: u64,
    pub expires: Option<u64>,
}

/// Sign a request the way an AudioConnector client does.
///
/// Returns the `(Signature-Input, Signature)` header values. `request_target`
/// is the path and query of the request; `@authority` comes from the `Host`
/// header in `headers`.
pub fn sign_request(
    headers: &HeaderMap,
    request_target: &str,
    signing: &SigningParameters,
    secret: &[u8],
) -> Result<(String, String), VerifyFailure> {
    let component_list = signing
        .components
        .iter()
        .map(|component| format!("\"{component}\""))
        .collect::<Vec<_>>()
        .join(" ");
    let mut serialized = format!(
        "({component_list});keyid=\"{}\";nonce=\"{}\";alg=\"{HMAC_SHA256}\";created={}",
        signing.keyid, signing.nonce, signing.created
    );
    if let Some(expires) = signing.expires {
        serialized.push_str(&format!(";expires={expires}"));
    }

    let parameters = parse_input_member(&format!("{}={serialized}", signing.label))?;
    let base = signature_base(&parameters, |name| match name {
        "@request-target" => Some(request_target.to_string()),
        AUTHORITY_COMPONENT => header_value(headers, "host").map(|host| host.to_ascii_lowercase()),
        name if name.starts_with('@') => None,
        name => header_value(headers, name),
    })?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| VerifyFailure::new(FailureKind::BadKey, "Invalid key material"))?;
    mac.update(base.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok((
        format!("{}={serialized}", signing.label),
        format!("{}=:{signature}:", signing.label),
    ))
}
