use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How a client frames messages on stdio. Responses mirror the request framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Framing {
    /// `Content-Length: N\r\n\r\n{...}`
    ContentLength,
    /// One JSON document per line
    NewlineDelimited,
}

/// Largest `Content-Length` accepted from a client.
pub(crate) const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("ddmcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) async fn read_framed_json<R>(
    reader: &mut R,
) -> Result<Option<(Value, Framing)>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if content_length.is_none() && trimmed.starts_with(['{', '[']) {
            let json = serde_json::from_str(trimmed).map_err(invalid_payload)?;
            return Ok(Some((json, Framing::NewlineDelimited)));
        }

        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }

        if trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = trimmed
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            if parsed > MAX_MESSAGE_BYTES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Content-Length {parsed} exceeds the {MAX_MESSAGE_BYTES} byte limit"),
                ));
            }
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(invalid_payload)?;
    Ok(Some((json, Framing::ContentLength)))
}

pub(crate) async fn write_framed_json<W>(
    writer: &mut W,
    value: &Value,
    framing: Framing,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::NewlineDelimited => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

fn invalid_payload(err: serde_json::Error) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("Invalid JSON payload: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::BufReader;

    use super::{Framing, MAX_MESSAGE_BYTES, read_framed_json, write_framed_json};

    #[tokio::test]
    async fn reads_content_length_framed_messages() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let raw = format!(
            "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n{body}",
            body.len()
        );
        let mut reader = BufReader::new(raw.as_bytes());

        let (value, framing) = read_framed_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::ContentLength);
        assert_eq!(value["method"], "ping");
        assert!(read_framed_json(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_newline_delimited_messages() {
        let raw = "\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n";
        let mut reader = BufReader::new(raw.as_bytes());

        let (first, framing) = read_framed_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::NewlineDelimited);
        assert_eq!(first["id"], 1);
        let (second, _) = read_framed_json(&mut reader).await.unwrap().unwrap();
        assert_eq!(second["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn truncated_headers_are_an_error() {
        let mut reader = BufReader::new("Content-Length: 10\r\n".as_bytes());
        let err = read_framed_json(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected_before_reading() {
        let raw = format!("Content-Length: {}\r\n\r\n{{}}", MAX_MESSAGE_BYTES + 1);
        let mut reader = BufReader::new(raw.as_bytes());
        let err = read_framed_json(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let raw = format!("Content-Length: {}\r\n\r\n", usize::MAX);
        let mut reader = BufReader::new(raw.as_bytes());
        let err = read_framed_json(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn writes_mirror_the_request_framing() {
        let value = json!({ "jsonrpc": "2.0", "id": 1, "result": {} });

        let mut framed = Vec::new();
        write_framed_json(&mut framed, &value, Framing::ContentLength)
            .await
            .unwrap();
        let framed = String::from_utf8(framed).unwrap();
        assert!(framed.starts_with("Content-Length: "));
        assert!(framed.ends_with("}"));

        let mut lines = Vec::new();
        write_framed_json(&mut lines, &value, Framing::NewlineDelimited)
            .await
            .unwrap();
        let lines = String::from_utf8(lines).unwrap();
        assert!(lines.ends_with("}\n"));
        assert_eq!(lines.lines().count(), 1);
    }
}
