//! SSE decoding for provider streaming responses.
//!
//! Providers stream `data: {...}` lines. This module turns a reqwest byte
//! stream into a stream of data payloads, dropping keep-alive comments and
//! stopping at the `[DONE]` sentinel.

use futures::{Stream, StreamExt};
use portico_abstraction::ProviderError;
use std::pin::Pin;

/// A stream of SSE `data:` payloads.
pub type DataStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Splits an SSE byte stream into `data:` payload strings.
pub fn data_lines(
    body: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> DataStream {
    let stream = futures::stream::unfold(
        (Box::pin(body), String::new(), false),
        |(mut body, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                // Emit any complete line already buffered.
                if let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim().to_string();
                    if payload == "[DONE]" {
                        return None;
                    }
                    if payload.is_empty() {
                        continue;
                    }
                    return Some((Ok(payload), (body, buffer, false)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(ProviderError::Request(format!("stream read failed: {}", e))),
                            (body, buffer, true),
                        ));
                    }
                    None => return None,
                }
            }
        },
    );
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(parts: Vec<&str>) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(bytes::Bytes::copy_from_slice(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_extracts_data_payloads() {
        let lines: Vec<_> = data_lines(byte_stream(vec!["data: {\"a\":1}\n\ndata: {\"b\":2}\n\n"]))
            .collect()
            .await;
        let payloads: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_at_done_sentinel() {
        let lines: Vec<_> =
            data_lines(byte_stream(vec!["data: {\"a\":1}\n\ndata: [DONE]\n\ndata: {\"b\":2}\n\n"]))
                .collect()
                .await;
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_reassembles_split_chunks() {
        let lines: Vec<_> =
            data_lines(byte_stream(vec!["data: {\"par", "tial\":true}\n\n"])).collect().await;
        assert_eq!(lines[0].as_ref().unwrap(), "{\"partial\":true}");
    }

    #[tokio::test]
    async fn test_ignores_comments_and_events() {
        let lines: Vec<_> = data_lines(byte_stream(vec![
            ": keep-alive\nevent: ping\ndata: {\"x\":1}\n\n",
        ]))
        .collect()
        .await;
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let lines: Vec<_> =
            data_lines(byte_stream(vec!["data: {\"x\":1}\r\n\r\n"])).collect().await;
        assert_eq!(lines[0].as_ref().unwrap(), "{\"x\":1}");
    }
}
