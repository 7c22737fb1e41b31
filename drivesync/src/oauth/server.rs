//! Just enough HTTP/1.1 to serve the OAuth2 localhost redirect.

use std::str;

use anyhow::Context;
use chrono::Utc;
use http::{HeaderValue, Method, Request, Uri};
use tokio::io;

/// Parses the request head (request line and headers).
/// The redirect request carries no body, so none is read.
pub async fn parse_request<R>(reader: R) -> anyhow::Result<Request<()>>
where
    R: io::AsyncBufRead,
{
    tokio::pin!(reader);

    const DELIM: &[u8; 2] = b"\r\n";

    let mut buf = Vec::new();
    read_until_pattern(&mut reader, DELIM, &mut buf).await?;
    if buf.is_empty() {
        anyhow::bail!("Empty HTTP request");
    }
    let (method, uri) = parse_command(&buf)?;

    let mut req = Request::builder().method(method).uri(uri);

    loop {
        buf.clear();
        read_until_pattern(&mut reader, DELIM, &mut buf).await?;
        if buf.len() <= 2 {
            break;
        }
        let (name, value) = parse_header(&buf)?;
        req = req.header(name, value.parse::<HeaderValue>()?);
    }
    Ok(req.body(())?)
}

fn parse_command(line: &[u8]) -> anyhow::Result<(Method, Uri)> {
    let mut parts = line.split(|b| *b == b' ');
    let line = str::from_utf8(line)?;

    let method = parts
        .next()
        .with_context(|| format!("no method in header {line}"))?;
    let method = Method::from_bytes(method)
        .with_context(|| format!("Unrecognized method: {}", String::from_utf8_lossy(method)))?;

    let uri = parts
        .next()
        .with_context(|| format!("no path in HTTP header {line}"))?;
    let uri = uri.try_into()?;

    let protocol = parts
        .next()
        .with_context(|| format!("no protocol in HTTP header {line}"))?;
    if protocol != b"HTTP/1.1\r\n" {
        anyhow::bail!("unsupported HTTP protocol in header {line}");
    }
    Ok((method, uri))
}

fn parse_header(line: &[u8]) -> anyhow::Result<(&str, &str)> {
    let line = str::from_utf8(line)?;
    let (name, value) = line
        .split_once(':')
        .with_context(|| format!("Invalid header: {line}"))?;
    Ok((name.trim(), value.trim()))
}

pub async fn write_response<W, B>(resp: http::Response<B>, writer: W) -> anyhow::Result<()>
where
    W: io::AsyncWrite,
    B: AsRef<[u8]>,
{
    use io::AsyncWriteExt;

    let (parts, body) = resp.into_parts();
    let body = body.as_ref();

    tokio::pin!(writer);
    writer
        .write_all(format!("{:?} {}\r\n", parts.version, parts.status).as_bytes())
        .await?;
    if !parts.headers.contains_key("date") {
        writer
            .write_all(format!("Date: {}\r\n", Utc::now().to_rfc2822()).as_bytes())
            .await?;
    }
    if !parts.headers.contains_key("server") {
        writer.write_all(b"Server: drivesync\r\n").await?;
    }
    if !body.is_empty() && !parts.headers.contains_key("content-length") {
        writer
            .write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes())
            .await?;
    }
    for (name, value) in parts.headers.iter() {
        writer.write_all(format!("{name}: ").as_bytes()).await?;
        writer.write_all(value.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"\r\n").await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Query parameters of the redirect URI
#[derive(Debug)]
pub struct QueryMap<'a>(Vec<(&'a str, &'a str)>);

impl<'a> QueryMap<'a> {
    pub fn parse(query: Option<&'a str>) -> QueryMap<'a> {
        let mut vec = Vec::new();
        if let Some(query) = query {
            for part in query.split('&') {
                let (name, value) = part.split_once('=').unwrap_or((part, ""));
                vec.push((name, value));
            }
        }
        QueryMap(vec)
    }

    pub fn get(&'a self, key: &str) -> Option<&'a str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }
}

/// Read from reader until either pattern or EOF is found.
/// Pattern is included in the buffer.
async fn read_until_pattern<R>(reader: R, pattern: &[u8], buf: &mut Vec<u8>) -> anyhow::Result<usize>
where
    R: io::AsyncBufRead,
{
    use io::{AsyncBufReadExt, AsyncReadExt};

    debug_assert!(!pattern.is_empty());
    tokio::pin!(reader);
    let mut bb: [u8; 1] = [0];
    let mut len = 0;
    'outer: loop {
        let sz = reader.read_until(pattern[0], buf).await?;
        if sz == 0 {
            break;
        }
        len += sz;
        for c in pattern[1..].iter() {
            let sz = reader.read(&mut bb[..]).await?;
            if sz == 0 {
                break 'outer;
            }
            len += sz;
            buf.push(bb[0]);
            if bb[0] != *c {
                continue 'outer;
            }
        }
        break;
    }
    Ok(len)
}
