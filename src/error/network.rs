//
// meli - jmap sync engine
//
// Copyright 2025 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! Error kinds for network related errors.

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NetworkErrorKind {
    /// Unspecified
    #[default]
    None,
    /// Name lookup of host failed.
    HostLookupFailed,
    /// Bad client Certificate
    BadClientCertificate,
    /// Bad server certificate
    BadServerCertificate,
    /// Client initialization
    ClientInitialization,
    /// Connection failed
    ConnectionFailed,
    /// TLS Connection failed
    TLSConnectionFailed,
    /// Invalid content encoding
    InvalidContentEncoding,
    /// Invalid credentials
    InvalidCredentials,
    /// Invalid request
    InvalidRequest,
    /// IO Error
    Io,
    /// Protocol violation
    ProtocolViolation,
    /// Request body not rewindable
    RequestBodyNotRewindable,
    /// Connection (not request) timeout.
    Timeout,
    /// Too many redirects
    TooManyRedirects,
    /// Invalid TLS connection
    InvalidTLSConnection,
    /// Equivalent to HTTP status code 400 Bad Request
    BadRequest,
    /// Equivalent to HTTP status code 401 Unauthorized
    Unauthorized,
    /// Equivalent to HTTP status code 403 Forbidden
    Forbidden,
    /// Equivalent to HTTP status code 404 Not Found
    NotFound,
    /// Equivalent to HTTP status code 405 Method Not Allowed
    MethodNotAllowed,
    /// Equivalent to HTTP status code 408 Request Timeout
    RequestTimeout,
    /// Equivalent to HTTP status code 413 Payload Too Large
    PayloadTooLarge,
    /// Equivalent to HTTP status code 416 Range Not Satisfiable
    RangeNotSatisfiable,
    /// Equivalent to HTTP status code 429 Too Many Requests
    TooManyRequests,
    /// Equivalent to HTTP status code 500 Internal Server Error
    InternalServerError,
    /// Equivalent to HTTP status code 501 Not Implemented
    NotImplemented,
    /// Equivalent to HTTP status code 502 Bad Gateway
    BadGateway,
    /// Equivalent to HTTP status code 503 Service Unavailable
    ServiceUnavailable,
    /// Equivalent to HTTP status code 504 Gateway Timeout
    GatewayTimeout,
    /// Equivalent to HTTP status code 511 Network Authentication Required
    NetworkAuthenticationRequired,
}

impl NetworkErrorKind {
    pub const fn as_str(&self) -> &'static str {
        use NetworkErrorKind::*;
        match self {
            None => "Unspecified network error",
            HostLookupFailed => "Name lookup of host failed",
            BadClientCertificate => "Bad client certificate",
            BadServerCertificate => "Bad server Certificate",
            ClientInitialization => "Client initialization",
            ConnectionFailed => "Connection failed",
            TLSConnectionFailed => "TLS connection failed",
            InvalidContentEncoding => "Invalid content encoding",
            InvalidCredentials => "Invalid credentials",
            InvalidRequest => "Invalid request",
            Io => "IO error",
            ProtocolViolation => "Protocol violation",
            RequestBodyNotRewindable => "Request body not rewindable",
            Timeout => "Connection (not request) timeout",
            TooManyRedirects => "Too many redirects",
            InvalidTLSConnection => "Invalid TLS connection",
            BadRequest => "Bad request",
            Unauthorized => "Unauthorized",
            Forbidden => "Forbidden",
            NotFound => "Not found",
            MethodNotAllowed => "Method not allowed",
            RequestTimeout => "Request timeout",
            PayloadTooLarge => "Payload too large",
            RangeNotSatisfiable => "Range not satisfiable",
            TooManyRequests => "Too many requests",
            InternalServerError => "Internal server error",
            NotImplemented => "Not implemented",
            BadGateway => "Bad gateway",
            ServiceUnavailable => "Service unavailable",
            GatewayTimeout => "Gateway timeout",
            NetworkAuthenticationRequired => "Network authentication required",
        }
    }

    /// Error kind means network is certainly down.
    pub const fn is_network_down(&self) -> bool {
        use NetworkErrorKind::*;
        matches!(
            self,
            BadGateway
                | ServiceUnavailable
                | GatewayTimeout
                | NetworkAuthenticationRequired
                | ConnectionFailed
                | TLSConnectionFailed
        )
    }

    /// Error kind means there has been a loss of connection.
    pub const fn is_disconnected(&self) -> bool {
        use NetworkErrorKind::*;
        matches!(
            self,
            ConnectionFailed | TLSConnectionFailed | InvalidTLSConnection
        )
    }

    pub const fn from_status_code(code: u16) -> Self {
        match code {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            408 => Self::RequestTimeout,
            413 => Self::PayloadTooLarge,
            416 => Self::RangeNotSatisfiable,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            511 => Self::NetworkAuthenticationRequired,
            _ => Self::None,
        }
    }
}

impl From<isahc::http::StatusCode> for NetworkErrorKind {
    fn from(val: isahc::http::StatusCode) -> Self {
        Self::from_status_code(val.as_u16())
    }
}

impl From<&isahc::error::ErrorKind> for NetworkErrorKind {
    #[inline]
    fn from(val: &isahc::error::ErrorKind) -> Self {
        use isahc::error::ErrorKind::*;
        match val {
            BadClientCertificate => Self::BadClientCertificate,
            BadServerCertificate => Self::BadServerCertificate,
            ClientInitialization => Self::ClientInitialization,
            ConnectionFailed => Self::ConnectionFailed,
            InvalidContentEncoding => Self::InvalidContentEncoding,
            InvalidCredentials => Self::InvalidCredentials,
            InvalidRequest => Self::BadRequest,
            Io => Self::Io,
            NameResolution => Self::HostLookupFailed,
            ProtocolViolation => Self::ProtocolViolation,
            RequestBodyNotRewindable => Self::RequestBodyNotRewindable,
            Timeout => Self::Timeout,
            TlsEngine => Self::InvalidTLSConnection,
            TooManyRedirects => Self::TooManyRedirects,
            _ => Self::None,
        }
    }
}
