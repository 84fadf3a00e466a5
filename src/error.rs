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

//! An error object for `melib-jmap`.
//!
//! Errors are cloneable so that one failure can be delivered to every party
//! waiting on a shared in-flight operation (see
//! [`SessionResolver`](crate::session::SessionResolver)).

use std::{borrow::Cow, io, result, str, string, sync::Arc};

pub mod network;
pub use network::NetworkErrorKind;

use crate::methods::{MethodErrorType, RequestErrorType};

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    #[default]
    None,
    External,
    Bug,
    Configuration,
    Timeout,
    /// The server violated the protocol: malformed reply, missing
    /// correlation id, inconsistent state tokens.
    ProtocolError,
    Network(NetworkErrorKind),
    /// A method call was answered with an `error` response.
    Method(MethodErrorType),
    /// The whole request was rejected before any method was executed.
    Request(RequestErrorType),
    /// A ranged download did not resume at the requested offset.
    ResumptionFailed,
    /// Cached state was discarded and must be refetched.
    Invalidated,
    NotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::None => write!(fmt, "None"),
            Self::External => write!(fmt, "External"),
            Self::Bug => write!(fmt, "Bug, please report this!"),
            Self::Configuration => write!(fmt, "Configuration"),
            Self::Timeout => write!(fmt, "Timeout"),
            Self::ProtocolError => write!(fmt, "Protocol error"),
            Self::Network(inner) => write!(fmt, "{}", inner.as_str()),
            Self::Method(inner) => write!(fmt, "Method error: {}", inner.as_str()),
            Self::Request(inner) => write!(fmt, "Request error: {}", inner.as_str()),
            Self::ResumptionFailed => write!(fmt, "Resumption failed"),
            Self::Invalidated => write!(fmt, "Invalidated"),
            Self::NotFound => write!(fmt, "Not found"),
        }
    }
}

impl ErrorKind {
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub const fn is_network_down(&self) -> bool {
        matches!(self, Self::Network(ref k) if k.is_network_down())
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network(NetworkErrorKind::Timeout)
        )
    }
}

impl From<NetworkErrorKind> for ErrorKind {
    fn from(kind: NetworkErrorKind) -> Self {
        Self::Network(kind)
    }
}

impl From<MethodErrorType> for ErrorKind {
    fn from(kind: MethodErrorType) -> Self {
        Self::Method(kind)
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_details(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for std::result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_details(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: msg.into(),
            details: None,
            source: None,
            kind: ErrorKind::None,
        }
    }

    pub fn set_details<M>(mut self, details: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        if let Some(old_details) = self.details.as_ref() {
            self.details = Some(format!("{}. {}", old_details, details.into()).into());
        } else {
            self.details = Some(details.into());
        }
        self
    }

    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        let mut summary = summary.into();
        if !summary.ends_with('.') {
            summary.to_mut().push('.');
        }
        if self.summary.is_empty() {
            self.summary = summary;
        } else {
            self.summary = format!("{} {}", summary, self.summary).into();
        }
        self
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, new_val: ErrorKind) -> Self {
        self.kind = new_val;
        self
    }

    /// The server could not compute a delta from the given state token.
    pub fn is_cannot_calculate_changes(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Method(MethodErrorType::CannotCalculateChanges)
        )
    }

    /// The anchor of a paged query no longer exists in the results.
    pub fn is_anchor_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::Method(MethodErrorType::AnchorNotFound))
    }

    /// A write was rejected because the assumed state token is stale.
    pub fn is_state_mismatch(&self) -> bool {
        matches!(self.kind, ErrorKind::Method(MethodErrorType::StateMismatch))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            if !details.trim().is_empty() {
                write!(f, "\n{}", details)?;
            }
        }
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        if self.kind != ErrorKind::None {
            write!(f, "\nError kind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| &(*(*s)) as _)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => {
                ErrorKind::Network(NetworkErrorKind::ConnectionFailed)
            }
            _ => ErrorKind::Network(NetworkErrorKind::Io),
        };
        Self::new(err.to_string())
            .set_kind(kind)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<string::FromUtf8Error> for Error {
    #[inline]
    fn from(err: string::FromUtf8Error) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<str::Utf8Error> for Error {
    #[inline]
    fn from(err: str::Utf8Error) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<serde_json::error::Error> for Error {
    #[inline]
    fn from(err: serde_json::error::Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::ProtocolError)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<isahc::Error> for Error {
    #[inline]
    fn from(val: isahc::Error) -> Self {
        let kind: NetworkErrorKind = val.kind().into();
        Self::new(val.to_string())
            .set_source(Some(Arc::new(val)))
            .set_kind(ErrorKind::Network(kind))
    }
}

impl From<isahc::http::Error> for Error {
    #[inline]
    fn from(err: isahc::http::Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidRequest))
            .set_source(Some(Arc::new(err)))
    }
}

impl From<url::ParseError> for Error {
    #[inline]
    fn from(err: url::ParseError) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Configuration)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<async_tungstenite::tungstenite::Error> for Error {
    #[inline]
    fn from(err: async_tungstenite::tungstenite::Error) -> Self {
        use async_tungstenite::tungstenite::Error as WsError;

        let kind = match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                NetworkErrorKind::ConnectionFailed
            }
            WsError::Io(_) => NetworkErrorKind::Io,
            WsError::Protocol(_) => NetworkErrorKind::ProtocolViolation,
            WsError::Url(_) => NetworkErrorKind::InvalidRequest,
            WsError::Http(ref response) => {
                NetworkErrorKind::from_status_code(response.status().as_u16())
            }
            _ => NetworkErrorKind::None,
        };
        Self::new(err.to_string())
            .set_kind(ErrorKind::Network(kind))
            .set_source(Some(Arc::new(err)))
    }
}

impl From<async_native_tls::Error> for Error {
    #[inline]
    fn from(err: async_native_tls::Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Network(NetworkErrorKind::TLSConnectionFailed))
            .set_source(Some(Arc::new(err)))
    }
}

impl<'a> From<&'a str> for Error {
    #[inline]
    fn from(err: &'a str) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(err: String) -> Self {
        Self::new(err)
    }
}
