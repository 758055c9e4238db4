use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use kernel::{ErrorBody, ARCHIVE_FILE_NAME, FILES_FIELD, MAX_FILES_PER_REQUEST, TARGET_FORMAT_FIELD, UPLOAD_ROUTE};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

const ZIP_CONTENT_TYPE: &str = "application/zip";
const FALLBACK_FILE_NAME: &str = "converted";

pub struct ConvertParams {
    pub uri: String,
    pub target_format: String,
    pub output: PathBuf,
    pub extract: bool,
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid service URI '{0}'")]
    InvalidUri(String),
    #[error("no convertible images among the given paths")]
    NothingToSend,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service answered {status}: {detail}")]
    Service { status: u16, detail: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Local files selected for upload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inputs {
    pub accepted: Vec<PathBuf>,
    /// Files the service would reject because of their extension
    pub skipped: Vec<PathBuf>,
    /// Files past the per request limit
    pub dropped: Vec<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Expands `paths` into files (directories contribute their direct children),
/// keeping at most `max_files` files with an allowed extension.
pub fn collect_inputs(paths: &[PathBuf], max_files: usize) -> io::Result<Inputs> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut children: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            children.sort();
            files.extend(children);
        } else {
            files.push(path.clone());
        }
    }

    let mut inputs = Inputs::default();
    for file in files {
        let allowed = file
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(kernel::allowed_extension)
            .is_some();
        if !allowed {
            inputs.skipped.push(file);
        } else if inputs.accepted.len() < max_files {
            inputs.accepted.push(file);
        } else {
            inputs.dropped.push(file);
        }
    }
    Ok(inputs)
}

/// URL of the conversion endpoint below the service base `uri`.
pub fn endpoint(uri: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(uri).map_err(|_| ClientError::InvalidUri(uri.to_owned()))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUri(uri.to_owned()))?
        .pop_if_empty()
        .extend(UPLOAD_ROUTE.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// Bare file name from a `Content-Disposition` header. An RFC 5987
/// `filename*` wins over the plain `filename` parameter.
#[must_use]
pub fn attachment_name(headers: &HeaderMap) -> Option<String> {
    let value = String::from_utf8_lossy(headers.get(CONTENT_DISPOSITION)?.as_bytes()).into_owned();
    let params = disposition_params(&value);
    let extended = params
        .iter()
        .find(|(name, _)| name == "filename*")
        .and_then(|(_, v)| decode_extended(v));
    let raw = extended.or_else(|| {
        params
            .into_iter()
            .find(|(name, _)| name == "filename")
            .map(|(_, v)| v)
    })?;
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_owned())
    }
}

/// Parameters after the disposition type, names lowercased, quoted strings
/// unescaped.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();
    // disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ';').is_some() {}
        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ';') {
            name.push(c);
        }
        if name.is_empty() && chars.peek().is_none() {
            break;
        }
        let mut val = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => val.extend(chars.next()),
                        '"' => break,
                        c => val.push(c),
                    }
                }
                while chars.next_if(|c| *c != ';').is_some() {}
            } else {
                while let Some(c) = chars.next_if(|c| *c != ';') {
                    val.push(c);
                }
                val.truncate(val.trim_end().len());
            }
        }
        params.push((name.trim().to_ascii_lowercase(), val));
    }
    params
}

/// Decodes `UTF-8''percent%20encoded`. Other charsets are not supported.
fn decode_extended(value: &str) -> Option<String> {
    let (charset, rest) = value.split_once('\'')?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    let (_language, encoded) = rest.split_once('\'')?;
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

/// Unpacks every file of the zip at `archive` into `dir` under its bare name.
pub fn extract_archive(archive: &Path, dir: &Path) -> Result<Vec<SavedFile>, ClientError> {
    let mut zip = zip::ZipArchive::new(fs::File::open(archive)?)?;
    let mut saved = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(ToOwned::to_owned))
        else {
            continue;
        };
        let path = dir.join(name);
        let mut target = fs::File::create(&path)?;
        let size = io::copy(&mut entry, &mut target)?;
        saved.push(SavedFile { path, size });
    }
    Ok(saved)
}

/// Uploads the selected images and stores the service's answer in
/// `params.output`.
pub async fn convert(params: ConvertParams) -> Result<Vec<SavedFile>, ClientError> {
    let url = endpoint(&params.uri)?;
    let inputs = collect_inputs(&params.inputs, MAX_FILES_PER_REQUEST)?;
    for skipped in &inputs.skipped {
        println!("{} skipped: unsupported file type", skipped.display());
    }
    if !inputs.dropped.is_empty() {
        println!(
            "{} files over the limit of {MAX_FILES_PER_REQUEST} not sent",
            inputs.dropped.len()
        );
    }
    if inputs.accepted.is_empty() {
        return Err(ClientError::NothingToSend);
    }

    let mut form = Form::new().percent_encode_noop();
    for path in &inputs.accepted {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let f = File::open(path).await?;
        let len = f.metadata().await?.len();
        let stream = reqwest::Body::wrap_stream(ReaderStream::new(f));
        form = form.part(
            FILES_FIELD,
            Part::stream_with_length(stream, len).file_name(file_name),
        );
    }
    form = form.text(TARGET_FORMAT_FIELD, params.target_format.clone());

    let mut response = Client::new().post(url).multipart(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await?;
        let detail = serde_json::from_slice::<ErrorBody>(&body)
            .map(|e| e.detail)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(ClientError::Service {
            status: status.as_u16(),
            detail,
        });
    }

    let is_zip = response
        .headers()
        .get(CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes() == ZIP_CONTENT_TYPE.as_bytes());
    let file_name = attachment_name(response.headers()).unwrap_or_else(|| {
        if is_zip {
            ARCHIVE_FILE_NAME.to_owned()
        } else {
            FALLBACK_FILE_NAME.to_owned()
        }
    });

    tokio::fs::create_dir_all(&params.output).await?;
    let path = params.output.join(file_name);
    let mut out = File::create(&path).await?;
    let mut size = 0u64;
    while let Some(chunk) = response.chunk().await? {
        out.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    out.flush().await?;
    drop(out);

    if is_zip && params.extract {
        let archive = path.clone();
        let dir = params.output.clone();
        let saved = tokio::task::spawn_blocking(move || extract_archive(&archive, &dir))
            .await
            .map_err(io::Error::other)??;
        tokio::fs::remove_file(&path).await?;
        return Ok(saved);
    }
    Ok(vec![SavedFile { path, size }])
}

pub fn print_saved(saved: &[SavedFile]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(vec![
            Cell::new("File").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
        ]);

    for f in saved {
        table.add_row(vec![Cell::new(f.path.display()), Cell::new(f.size)]);
    }
    println!("{table}");
}
