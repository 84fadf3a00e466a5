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

//! Blob download and upload over the session's `downloadUrl` and
//! `uploadUrl`.

use std::sync::Arc;

use isahc::{
    http::{
        header::{CONTENT_RANGE, CONTENT_TYPE, RANGE},
        Request as HttpRequest, StatusCode,
    },
    AsyncReadResponseExt, HttpClient,
};

use crate::{
    conf::JmapServerConf,
    deserialize_from_str,
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    methods::{download_request_format, upload_request_format, UploadResponse},
    objects::{BlobObject, Id},
    session::SessionResolver,
    utils::futures::timeout,
};

#[derive(Clone, Debug)]
pub struct BlobTransfer {
    server_conf: Arc<JmapServerConf>,
    client: Arc<HttpClient>,
    resolver: Arc<SessionResolver>,
}

impl BlobTransfer {
    pub fn new(
        server_conf: Arc<JmapServerConf>,
        client: Arc<HttpClient>,
        resolver: Arc<SessionResolver>,
    ) -> Self {
        Self {
            server_conf,
            client,
            resolver,
        }
    }

    /// Download `blob_id`, starting at byte `range_start`.
    ///
    /// A non-zero `range_start` resumes an interrupted download. If the
    /// server does not answer with exactly the requested range, nothing is
    /// returned and the error kind is [`ErrorKind::ResumptionFailed`]; the
    /// caller has to restart from `0`.
    pub async fn download(
        &self,
        blob_id: &Id<BlobObject>,
        name: Option<&str>,
        range_start: u64,
    ) -> Result<Vec<u8>> {
        let session = self.resolver.get().await?;
        let url = download_request_format(
            &session.download_url,
            &session.mail_account_id()?,
            blob_id,
            name,
            None,
        )?;
        let mut req = HttpRequest::get(url.as_str());
        if range_start > 0 {
            req = req.header(RANGE, format!("bytes={}-", range_start));
        }
        let req = req.body(())?;
        let mut res = timeout(self.server_conf.timeout, self.client.send_async(req)).await??;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::new(format!(
                "Could not download blob {}: {}",
                blob_id, status
            ))
            .set_kind(NetworkErrorKind::from(status).into()));
        }
        if range_start > 0 {
            let content_range = res
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok());
            check_resumed(blob_id, status, content_range, range_start)?;
        }
        Ok(res.bytes().await?)
    }

    /// Upload `bytes` with media type `mime_type` to the mail account.
    pub async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<UploadResponse> {
        let session = self.resolver.get().await?;
        let url = upload_request_format(&session.upload_url, &session.mail_account_id()?)?;
        let req = HttpRequest::post(url.as_str())
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)?;
        let mut res = timeout(self.server_conf.timeout, self.client.send_async(req)).await??;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(Error::new(format!("Could not upload blob: {}", status))
                .set_details(text)
                .set_kind(NetworkErrorKind::from(status).into()));
        }
        if cfg!(feature = "jmap-trace") {
            log::trace!("upload(): response {}", text);
        }
        deserialize_from_str(&text)
    }
}

/// A resumed download must be a `206 Partial Content` whose
/// `Content-Range` starts at `range_start`.
fn check_resumed(
    blob_id: &Id<BlobObject>,
    status: StatusCode,
    content_range: Option<&str>,
    range_start: u64,
) -> Result<()> {
    let expected = format!("bytes {}-", range_start);
    match content_range {
        Some(range) if status == StatusCode::PARTIAL_CONTENT && range.starts_with(&expected) => {
            Ok(())
        }
        other => Err(Error::new(format!(
            "Could not resume download of blob {} at byte {}",
            blob_id, range_start
        ))
        .set_details(format!(
            "status {}, Content-Range: {}",
            status,
            other.unwrap_or("none")
        ))
        .set_kind(ErrorKind::ResumptionFailed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmap_blob_resumption() {
        let blob_id: Id<BlobObject> = "Gb1".into();
        check_resumed(
            &blob_id,
            StatusCode::PARTIAL_CONTENT,
            Some("bytes 1024-2047/2048"),
            1024,
        )
        .unwrap();
        for (status, range) in [
            (StatusCode::OK, Some("bytes 1024-2047/2048")),
            (StatusCode::PARTIAL_CONTENT, Some("bytes 0-2047/2048")),
            (StatusCode::PARTIAL_CONTENT, Some("bytes 10240-20479/20480")),
            (StatusCode::PARTIAL_CONTENT, None),
        ] {
            assert_eq!(
                check_resumed(&blob_id, status, range, 1024).unwrap_err().kind,
                ErrorKind::ResumptionFailed
            );
        }
    }
}
