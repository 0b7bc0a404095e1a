//! HTTP request/response → collector descriptors

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequest, MatchedPath, Multipart};
use axum::http::{header, request, response, HeaderMap, Method, Request};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::net::SocketAddr;

use crate::collector::{RequestDescriptor, ResponseDescriptor, RouteInfo, UploadedFile, UploadedFiles};
use crate::snapshot::{HeaderBag, StringMap};

/// What the capture middleware kept of a body
#[derive(Debug, Clone, PartialEq)]
pub enum BodyCapture {
    Buffered(Bytes),
    /// Declared size is above the buffering cap
    TooLarge,
    /// Size not known up front; passed through without reading
    Streaming,
}

impl BodyCapture {
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Build a request descriptor from the request head and, when it was
/// buffered, its body
pub fn describe_request(parts: &request::Parts, body: Option<&Bytes>) -> RequestDescriptor {
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let client_ip = remote_addr.clone().or_else(|| forwarded_for(&parts.headers));

    let matched_path = parts
        .extensions
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());

    let mut attributes = indexmap::IndexMap::new();
    if let Some(path) = &matched_path {
        attributes.insert("matched_path".to_string(), Value::String(path.clone()));
    }

    let route = matched_path.map(|path| RouteInfo {
        action: format!("{} {}", parts.method, path),
        middleware: Vec::new(),
    });

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut server = StringMap::new();
    server.insert("REQUEST_METHOD".to_string(), parts.method.to_string());
    server.insert("REQUEST_URI".to_string(), path_and_query);
    server.insert("SERVER_PROTOCOL".to_string(), format!("{:?}", parts.version));
    server.insert(
        "REQUEST_TIME_FLOAT".to_string(),
        format!("{:.6}", chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0),
    );
    if let Some(host) = header_text(&parts.headers, header::HOST) {
        server.insert("HTTP_HOST".to_string(), host);
    }
    if let Some(addr) = &remote_addr {
        server.insert("REMOTE_ADDR".to_string(), addr.clone());
    }

    RequestDescriptor {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query_string: parts.uri.query().map(str::to_string),
        client_ip,
        headers: header_bag(&parts.headers),
        cookies: cookies(&parts.headers),
        query: parts.uri.query().map(parse_form).unwrap_or_default(),
        body: body
            .map(|bytes| body_fields(&parts.method, &parts.headers, bytes))
            .unwrap_or_else(|| Value::Object(Map::new())),
        files: Default::default(),
        server,
        attributes,
        route,
    }
}

/// Build a response descriptor from the response head and what was kept of
/// its body
pub fn describe_response(parts: &response::Parts, body: &BodyCapture) -> ResponseDescriptor {
    let redirect_target = if parts.status.is_redirection() {
        header_text(&parts.headers, header::LOCATION)
    } else {
        None
    };

    let oversized_json = *body == BodyCapture::TooLarge && is_json_mime(&mime_type(&parts.headers));

    ResponseDescriptor {
        status: parts.status.as_u16(),
        headers: header_bag(&parts.headers),
        body: body
            .bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok().map(str::to_string)),
        redirect_target,
        oversized_json,
    }
}

/// Text fields and uploaded files of a buffered `multipart/form-data` body.
///
/// Bracketed field names (`docs[]`, `user[name]`) nest. Returns `None` when
/// the body is not multipart or cannot be parsed.
pub async fn multipart_input(
    headers: &HeaderMap,
    body: Bytes,
) -> Option<(Value, IndexMap<String, UploadedFiles>)> {
    let content_type = header_text(headers, header::CONTENT_TYPE)?;
    if mime_type(headers) != "multipart/form-data" {
        return None;
    }

    let request = Request::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .ok()?;
    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::debug!(error = %e, "Multipart body rejected");
            return None;
        }
    };

    let mut fields = Map::new();
    let mut files = IndexMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed multipart body");
                return None;
            }
        };

        let path = field_path(field.name().unwrap_or_default());
        let file_name = field.file_name().map(str::to_string);

        match file_name {
            Some(client_name) => {
                let size = match field.bytes().await {
                    Ok(bytes) => bytes.len() as u64,
                    Err(e) => {
                        tracing::debug!(error = %e, "Unreadable multipart file");
                        return None;
                    }
                };
                // Browsers send an empty file name for an empty file input
                let file = UploadedFile {
                    is_file: !client_name.is_empty(),
                    client_name,
                    size,
                };
                insert_file(&mut files, &path, file);
            }
            None => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!(error = %e, "Unreadable multipart field");
                        return None;
                    }
                };
                insert_field(&mut fields, &path, Value::String(text));
            }
        }
    }

    Some((Value::Object(fields), files))
}

/// Split `a[b][]` into `["a", "b", ""]`; an empty segment means "append"
fn field_path(name: &str) -> Vec<String> {
    match name.find('[') {
        Some(open) if open > 0 && name.ends_with(']') => {
            let mut path = vec![name[..open].to_string()];
            path.extend(name[open + 1..name.len() - 1].split("][").map(str::to_string));
            path
        }
        _ => vec![name.to_string()],
    }
}

fn insert_field(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let key = if head.is_empty() {
        map.len().to_string()
    } else {
        head.clone()
    };

    if rest.is_empty() {
        map.insert(key, value);
        return;
    }

    let entry = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert_field(child, rest, value);
    }
}

fn insert_file(files: &mut IndexMap<String, UploadedFiles>, path: &[String], file: UploadedFile) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let key = if head.is_empty() {
        files.len().to_string()
    } else {
        head.clone()
    };

    if rest.is_empty() {
        files.insert(key, UploadedFiles::File(file));
        return;
    }

    let entry = files
        .entry(key)
        .or_insert_with(|| UploadedFiles::Group(IndexMap::new()));
    if let UploadedFiles::File(_) = entry {
        *entry = UploadedFiles::Group(IndexMap::new());
    }
    if let UploadedFiles::Group(group) = entry {
        insert_file(group, rest, file);
    }
}

/// Headers grouped by name, values in arrival order
pub fn header_bag(headers: &HeaderMap) -> HeaderBag {
    let mut bag = HeaderBag::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        bag.insert(name.as_str().to_string(), values);
    }
    bag
}

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Cookies from every `Cookie` header; later duplicates win
pub fn cookies(headers: &HeaderMap) -> StringMap {
    let mut cookies = StringMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

fn parse_form(input: &str) -> StringMap {
    url::form_urlencoded::parse(input.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Lowercased media type of the `Content-Type` header, parameters stripped
fn mime_type(headers: &HeaderMap) -> String {
    header_text(headers, header::CONTENT_TYPE)
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json_mime(mime: &str) -> bool {
    mime == "application/json" || mime.ends_with("+json")
}

/// Decoded body fields for form and JSON bodies, `{}` otherwise
fn body_fields(method: &Method, headers: &HeaderMap, body: &Bytes) -> Value {
    let empty = || Value::Object(Map::new());
    if body.is_empty() || *method == Method::GET || *method == Method::HEAD {
        return empty();
    }

    let mime = mime_type(headers);

    if mime == "application/x-www-form-urlencoded" {
        let Ok(text) = std::str::from_utf8(body) else {
            return empty();
        };
        let fields = parse_form(text)
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        return Value::Object(fields);
    }

    if is_json_mime(&mime) {
        return match serde_json::from_slice::<Value>(body) {
            Ok(value) if value.is_object() || value.is_array() => value,
            _ => empty(),
        };
    }

    empty()
}
