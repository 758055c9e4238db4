use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::{
    openapi::{
        self, content::ContentBuilder, schema::Type, KnownFormat, ObjectBuilder, RefOr,
        ResponseBuilder, SchemaFormat,
    },
    ToResponse,
};

use crate::cleanup::Handoff;
use crate::storage::CHUNK_SIZE;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const ZIP: &str = "application/zip";

/// A file on disk sent as an attachment.
///
/// The file is opened before the reply is built, so the descriptor stays
/// valid while cleanup removes the path during streaming.
pub struct FileReply {
    file: File,
    size: u64,
    file_name: String,
    content_type: &'static str,
    handoff: Handoff,
}

impl FileReply {
    pub async fn open(
        path: &Path,
        file_name: impl Into<String>,
        content_type: &'static str,
        handoff: Handoff,
    ) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file,
            size,
            file_name: file_name.into(),
            content_type,
            handoff,
        })
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let stream = HandoffStream::new(
            ReaderStream::with_capacity(self.file, CHUNK_SIZE),
            self.handoff,
        );
        let mut res = Body::from_stream(stream).into_response();
        res.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        if let Ok(val) = HeaderValue::from_str(&content_disposition(&self.file_name)) {
            res.headers_mut().insert(header::CONTENT_DISPOSITION, val);
        }
        res.headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(self.size));

        res
    }
}

impl ToResponse<'static> for FileReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let binary = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Binary)))
            .build();
        let content = |schema: openapi::schema::Object| {
            ContentBuilder::new().schema(Some(schema)).build()
        };
        (
            "FileReply",
            ResponseBuilder::new()
                .description("The converted file, or a zip of all converted files")
                .content(OCTET_STREAM, content(binary.clone()))
                .content(ZIP, content(binary))
                .build()
                .into(),
        )
    }
}

/// `attachment` disposition carrying `file_name` twice: as an ASCII quoted
/// string with everything else replaced by `_`, and percent-encoded UTF-8 in
/// `filename*`.
#[must_use]
pub fn content_disposition(file_name: &str) -> String {
    let mut fallback = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        match c {
            '"' | '\\' => {
                fallback.push('\\');
                fallback.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => fallback.push(c),
            _ => fallback.push('_'),
        }
    }
    format!(
        r#"attachment; filename="{fallback}"; filename*=UTF-8''{}"#,
        urlencoding::encode(file_name)
    )
}

/// Body stream that schedules its [`Handoff`] when the transport first polls
/// it, or when it is dropped without ever being polled.
pub struct HandoffStream<S> {
    inner: S,
    handoff: Option<Handoff>,
}

impl<S> HandoffStream<S> {
    pub fn new(inner: S, handoff: Handoff) -> Self {
        Self {
            inner,
            handoff: Some(handoff),
        }
    }

    fn hand_off(&mut self) {
        if let Some(handoff) = self.handoff.take() {
            handoff.schedule();
        }
    }
}

impl<S: Stream + Unpin> Stream for HandoffStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.hand_off();
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for HandoffStream<S> {
    fn drop(&mut self) {
        self.hand_off();
    }
}
