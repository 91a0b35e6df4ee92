//! # Header parser
//!
//! Zero-copy parsing of the HTTP/1.1 subset used by the WebSocket opening
//! handshake ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! The parser never copies a value. Every recognized field is recorded as a
//! [`FieldRef`], an offset and a length into the buffer that was parsed, and is
//! resolved back into bytes through a [`Headers`] view borrowing that same
//! buffer. Only a fixed set of fields is recognized (see [`Field`]); any other
//! header line is validated for syntax and then skipped.
//!
//! ```rust
//! use spws::header::{self, Field, Headers};
//!
//! let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n\r\n";
//! let end = header::find_terminator(raw).unwrap();
//! let fields = header::parse_request(&raw[..end]).unwrap();
//! let headers = Headers::new(raw, &fields);
//!
//! assert_eq!(headers.get(Field::Uri), Some(&b"/chat"[..]));
//! assert_eq!(headers.get_str(Field::Host), Some("example.com"));
//! assert!(headers.eq_ignore_ascii_case(Field::Upgrade, "WebSocket"));
//! ```
use nom::{
    bytes::complete::{tag, take_till1, take_until, take_while, take_while1, take_while_m_n},
    combinator::{all_consuming, opt, rest},
    sequence::{preceded, terminated},
    IResult, Offset, Parser,
};
use thiserror::Error;

/// Largest header block accepted, terminator included.
pub const MAX_HEADER_SIZE: usize = 4096;

/// Longest single line accepted, CRLF excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// Blank line closing a header block.
pub const TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// A field the handshake knows about.
///
/// `Uri`, `StatusCode` and `ReasonPhrase` come from the start line; every other
/// variant is a header whose name is matched case-insensitively.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Host,
    Origin,
    Key,
    Upgrade,
    Connection,
    Version,
    Protocol,
    Server,
    AcceptKey,
    StatusCode,
    ReasonPhrase,
    Uri,
    Extensions,
}

/// Recognized header names, lowercase.
static HEADER_NAMES: [(Field, &str); 10] = [
    (Field::Host, "host"),
    (Field::Origin, "origin"),
    (Field::Key, "sec-websocket-key"),
    (Field::Upgrade, "upgrade"),
    (Field::Connection, "connection"),
    (Field::Version, "sec-websocket-version"),
    (Field::Protocol, "sec-websocket-protocol"),
    (Field::Server, "server"),
    (Field::AcceptKey, "sec-websocket-accept"),
    (Field::Extensions, "sec-websocket-extensions"),
];

impl Field {
    /// Number of recognized fields.
    pub const COUNT: usize = 13;

    /// Human readable name, as it appears on the wire for header fields.
    pub fn name(self) -> &'static str {
        match self {
            Field::Host => "Host",
            Field::Origin => "Origin",
            Field::Key => "Sec-WebSocket-Key",
            Field::Upgrade => "Upgrade",
            Field::Connection => "Connection",
            Field::Version => "Sec-WebSocket-Version",
            Field::Protocol => "Sec-WebSocket-Protocol",
            Field::Server => "Server",
            Field::AcceptKey => "Sec-WebSocket-Accept",
            Field::StatusCode => "status code",
            Field::ReasonPhrase => "reason phrase",
            Field::Uri => "request target",
            Field::Extensions => "Sec-WebSocket-Extensions",
        }
    }

    fn from_header_name(name: &[u8]) -> Option<Field> {
        HEADER_NAMES
            .iter()
            .find(|(_, known)| known.as_bytes().eq_ignore_ascii_case(name))
            .map(|(field, _)| *field)
    }
}

/// Location of a field value inside the parsed buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldRef {
    offset: usize,
    len: usize,
}

impl FieldRef {
    /// Builds the reference of `value`, which must be a subslice of `base`.
    fn of(base: &[u8], value: &[u8]) -> Self {
        Self {
            offset: base.offset(value),
            len: value.len(),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolves the reference against `buf`, or `None` if it falls outside of it.
    pub fn resolve<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        buf.get(self.offset..self.offset + self.len)
    }
}

/// The set of fields found in one header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    refs: [Option<FieldRef>; Field::COUNT],
}

impl HeaderFields {
    pub fn get(&self, field: Field) -> Option<FieldRef> {
        self.refs[field as usize]
    }

    pub fn contains(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    /// Forgets every field.
    pub fn clear(&mut self) {
        self.refs = Default::default();
    }

    fn insert(&mut self, field: Field, value: FieldRef) -> Result<(), ParseError> {
        let slot = &mut self.refs[field as usize];
        if slot.is_some() {
            return Err(ParseError::DuplicateHeader(field.name()));
        }
        *slot = Some(value);
        Ok(())
    }
}

/// A read-only view resolving [`HeaderFields`] against the buffer they index.
#[derive(Clone, Copy)]
pub struct Headers<'a> {
    buf: &'a [u8],
    fields: &'a HeaderFields,
}

impl<'a> Headers<'a> {
    pub fn new(buf: &'a [u8], fields: &'a HeaderFields) -> Self {
        Self { buf, fields }
    }

    /// Raw value of `field`, if present.
    pub fn get(&self, field: Field) -> Option<&'a [u8]> {
        self.fields.get(field)?.resolve(self.buf)
    }

    /// Value of `field` as UTF-8, if present and valid.
    pub fn get_str(&self, field: Field) -> Option<&'a str> {
        std::str::from_utf8(self.get(field)?).ok()
    }

    /// Whether `field` is present and equal to `expected`, ignoring ASCII case.
    pub fn eq_ignore_ascii_case(&self, field: Field, expected: &str) -> bool {
        self.get(field)
            .map(|value| value.eq_ignore_ascii_case(expected.as_bytes()))
            .unwrap_or(false)
    }

    /// Whether the comma separated list in `field` contains `token`, ignoring ASCII case.
    pub fn has_token(&self, field: Field, token: &str) -> bool {
        self.get(field)
            .map(|value| {
                value
                    .split(|c| *c == b',')
                    .any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
            })
            .unwrap_or(false)
    }

    /// Numeric status code of a reply.
    pub fn status_code(&self) -> Option<u16> {
        self.get_str(Field::StatusCode)?.parse().ok()
    }
}

impl std::fmt::Debug for Headers<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for field in ALL_FIELDS {
            if let Some(value) = self.get(field) {
                map.entry(&field.name(), &String::from_utf8_lossy(value));
            }
        }
        map.finish()
    }
}

static ALL_FIELDS: [Field; Field::COUNT] = [
    Field::Host,
    Field::Origin,
    Field::Key,
    Field::Upgrade,
    Field::Connection,
    Field::Version,
    Field::Protocol,
    Field::Server,
    Field::AcceptKey,
    Field::StatusCode,
    Field::ReasonPhrase,
    Field::Uri,
    Field::Extensions,
];

/// Reasons a header block is rejected.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The block does not end with an empty line.
    #[error("incomplete header block")]
    Incomplete,

    /// The block exceeds [`MAX_HEADER_SIZE`].
    #[error("header block exceeds {} bytes", MAX_HEADER_SIZE)]
    TooLarge,

    /// A line exceeds [`MAX_LINE_LEN`].
    #[error("header line exceeds {} bytes", MAX_LINE_LEN)]
    LineTooLong,

    /// The first line is not `GET <target> HTTP/1.1`.
    #[error("malformed request line")]
    RequestLine,

    /// The first line is not `HTTP/1.1 <code> <reason>`.
    #[error("malformed status line")]
    StatusLine,

    /// A header line is not `name: value`.
    #[error("malformed header line")]
    HeaderLine,

    /// A recognized header appears more than once.
    #[error("duplicate {0} header")]
    DuplicateHeader(&'static str),
}

/// Returns the length of the header block at the start of `buf`, i.e. the
/// index right past the first blank line, or `None` if none is present yet.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
        .map(|pos| pos + TERMINATOR.len())
}

/// Smallest number of further bytes that could complete a terminator at the
/// end of `buf`: 0 if `buf` already ends with one, otherwise 1 to 4.
///
/// Reading exactly this many bytes guarantees the reader never consumes data
/// that follows the header block.
pub fn missing_terminator_bytes(buf: &[u8]) -> usize {
    (0..=TERMINATOR.len())
        .find(|missing| buf.ends_with(&TERMINATOR[..TERMINATOR.len() - missing]))
        .unwrap_or(TERMINATOR.len())
}

/// Parses a client request block (start line included, terminator included).
pub fn parse_request(block: &[u8]) -> Result<HeaderFields, ParseError> {
    parse_block(block, |fields, line| {
        let (_, uri) = request_line(line).map_err(|_| ParseError::RequestLine)?;
        fields.insert(Field::Uri, FieldRef::of(block, uri))
    })
}

/// Parses a server reply block (status line included, terminator included).
pub fn parse_reply(block: &[u8]) -> Result<HeaderFields, ParseError> {
    parse_block(block, |fields, line| {
        let (_, (code, reason)) = status_line(line).map_err(|_| ParseError::StatusLine)?;
        fields.insert(Field::StatusCode, FieldRef::of(block, code))?;
        fields.insert(Field::ReasonPhrase, FieldRef::of(block, reason))
    })
}

fn parse_block<'a, F>(block: &'a [u8], start_line: F) -> Result<HeaderFields, ParseError>
where
    F: FnOnce(&mut HeaderFields, &'a [u8]) -> Result<(), ParseError>,
{
    if block.len() > MAX_HEADER_SIZE {
        return Err(ParseError::TooLarge);
    }
    if !block.ends_with(TERMINATOR) {
        return Err(ParseError::Incomplete);
    }

    let mut fields = HeaderFields::default();
    let (mut input, first) = next_line(block)?;
    start_line(&mut fields, first)?;

    loop {
        let (remaining, line) = next_line(input)?;
        input = remaining;
        if line.is_empty() {
            break;
        }

        let (_, (name, value)) = header_line(line).map_err(|_| ParseError::HeaderLine)?;
        if let Some(field) = Field::from_header_name(name) {
            fields.insert(field, FieldRef::of(block, value))?;
        }
    }

    // The block must end at the first blank line.
    if !input.is_empty() {
        return Err(ParseError::HeaderLine);
    }

    Ok(fields)
}

fn next_line(input: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    let (remaining, line) = crlf_line(input).map_err(|_| ParseError::Incomplete)?;
    if line.len() > MAX_LINE_LEN {
        return Err(ParseError::LineTooLong);
    }
    Ok((remaining, line))
}

fn crlf_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until(&b"\r\n"[..]), tag(&b"\r\n"[..])).parse(input)
}

/// `GET <request-target> HTTP/1.1`
fn request_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, (_, target, _)) = all_consuming((
        tag(&b"GET "[..]),
        take_till1(|c: u8| c == b' ' || c.is_ascii_control()),
        tag(&b" HTTP/1.1"[..]),
    ))
    .parse(input)?;
    Ok((input, target))
}

/// `HTTP/1.1 <3 digits>[ <reason>]`
fn status_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, (_, code, reason)) = all_consuming((
        tag(&b"HTTP/1.1 "[..]),
        take_while_m_n(3, 3, |c: u8| c.is_ascii_digit()),
        opt(preceded(tag(&b" "[..]), rest)),
    ))
    .parse(input)?;

    // an absent reason phrase is an empty slice right after the code
    let reason = reason.unwrap_or(&code[code.len()..]);
    if reason.iter().any(|c| !is_field_byte(*c)) {
        return Err(nom::Err::Error(nom::error::Error::new(
            reason,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((input, (code, reason)))
}

/// `<token>:<OWS><value><OWS>`
fn header_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, (name, _, value)) = all_consuming((
        take_while1(is_token_byte),
        tag(&b":"[..]),
        take_while(is_field_byte),
    ))
    .parse(input)?;
    Ok((input, (name, value.trim_ascii())))
}

/// `tchar` from RFC 9110 Section 5.6.2.
fn is_token_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

/// Visible characters, spaces, tabs and obs-text.
fn is_field_byte(c: u8) -> bool {
    c == b'\t' || c == b' ' || c.is_ascii_graphic() || c >= 0x80
}
