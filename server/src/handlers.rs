use std::path::PathBuf;
use std::time::Instant;

use axum::extract::{Multipart, State};
use kernel::{ErrorBody, TargetFormat, UploadForm, ARCHIVE_FILE_NAME, FILES_FIELD, TARGET_FORMAT_FIELD};

use crate::archive;
use crate::cleanup::CleanupJob;
use crate::converter;
use crate::error::ServiceError;
use crate::file_reply::{FileReply, OCTET_STREAM, ZIP};
use crate::storage::{RequestWorkspace, StoredFile};
use crate::AppState;

/// Converts uploaded images into the requested format.
///
/// One converted file is returned as is, several are returned as a zip.
#[utoipa::path(
    post,
    path = "/upload-and-convert",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, response = FileReply),
        (status = 400, description = "Bad file name, unsupported file type or nothing to convert", body = ErrorBody),
        (status = 413, description = "A file exceeds the size limit", body = ErrorBody),
        (status = 500, description = "Conversion or packaging failed", body = ErrorBody)
    ),
    tag = "conversion",
)]
pub async fn upload_and_convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<FileReply, ServiceError> {
    let workspace = RequestWorkspace::create(&state.roots).await?;
    let start = Instant::now();
    match process(&state, &workspace, multipart).await {
        Ok(reply) => {
            tracing::info!(
                "workspace {} processed in {:?}",
                workspace.id(),
                start.elapsed()
            );
            Ok(reply)
        }
        Err(e) => {
            state.cleaner.run_now(&workspace).await;
            Err(e)
        }
    }
}

/// Fields of the multipart form after the uploads were saved.
struct ReceivedForm {
    files: Vec<StoredFile>,
    target_format: Option<String>,
    ignored: usize,
}

async fn process(
    state: &AppState,
    workspace: &RequestWorkspace,
    multipart: Multipart,
) -> Result<FileReply, ServiceError> {
    let form = receive(state, workspace, multipart).await?;
    if form.ignored > 0 {
        tracing::info!(
            "workspace {}: {} files over the limit of {} ignored",
            workspace.id(),
            form.ignored,
            state.limits.max_files
        );
    }
    if form.files.is_empty() {
        return Err(ServiceError::validation("No files converted"));
    }
    let target = match form.target_format.as_deref() {
        None => return Err(ServiceError::validation("target_format is required")),
        Some(token) => TargetFormat::parse(token).ok_or_else(|| {
            ServiceError::validation(format!("Unsupported target format '{token}'"))
        })?,
    };

    let mut converted: Vec<PathBuf> = Vec::with_capacity(form.files.len());
    for input in &form.files {
        let output = workspace.next_output_path(input.stem(), &target).await;
        converter::convert_file(
            state.codec.clone(),
            input.path.clone(),
            output.clone(),
            target.clone(),
        )
        .await?;
        converted.push(output);
    }

    match converted.as_slice() {
        [] => Err(ServiceError::validation("No files converted")),
        [single] => {
            let file_name = single
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let handoff = state.cleaner.handoff(CleanupJob::for_workspace(workspace));
            Ok(FileReply::open(single, file_name, OCTET_STREAM, handoff).await?)
        }
        _ => {
            let archive_path = workspace.archive_path().to_path_buf();
            archive::build_archive_file(converted, archive_path.clone()).await?;
            let mut jobs = CleanupJob::for_workspace(workspace);
            jobs.push(CleanupJob::after(&archive_path, state.archive_grace));
            let handoff = state.cleaner.handoff(jobs);
            Ok(FileReply::open(&archive_path, ARCHIVE_FILE_NAME, ZIP, handoff).await?)
        }
    }
}

async fn receive(
    state: &AppState,
    workspace: &RequestWorkspace,
    mut multipart: Multipart,
) -> Result<ReceivedForm, ServiceError> {
    let mut form = ReceivedForm {
        files: Vec::new(),
        target_format: None,
        ignored: 0,
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILES_FIELD) if form.files.len() < state.limits.max_files => {
                let file_name = field.file_name().map(str::to_owned);
                match workspace
                    .persist_upload(file_name.as_deref(), field, state.limits.max_file_size)
                    .await
                {
                    Ok(stored) => form.files.push(stored),
                    Err(e) => {
                        drain(&mut multipart).await;
                        return Err(e);
                    }
                }
            }
            Some(FILES_FIELD) => form.ignored += 1,
            Some(TARGET_FORMAT_FIELD) => {
                let value = field.text().await.map_err(|e| {
                    ServiceError::validation(format!("Malformed multipart body: {e}"))
                })?;
                form.target_format = Some(value);
            }
            other => tracing::debug!("unexpected form field {other:?} ignored"),
        }
    }
    Ok(form)
}

/// Consumes the rest of the body before an error response is sent.
async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(_)) = multipart.next_field().await {}
}
