//! Framed JSON analyzer protocol
//!
//! Each frame is a little-endian `u32` byte length followed by one JSON
//! document. A client writes a [`Request`] and blocks until the matching
//! [`Response`] frame arrives. Transport failures (oversized frames, short
//! reads, malformed JSON) surface as [`Error::Transport`]; a file the server
//! could not parse comes back as a failed response and surfaces as
//! [`Error::Parse`].

use super::{Analyzer, ManifestSummary, SourceSummary};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// Largest accepted frame body
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Source { path: PathBuf },
    Manifest { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn failure(message: impl Into<String>) -> Self {
        Response {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Write one frame and flush
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Transport("frame length overflows u32".to_string()))?;
    writer
        .write_all(&len.to_le_bytes())
        .and_then(|_| writer.write_all(&body))
        .and_then(|_| writer.flush())
        .map_err(|e| Error::Transport(format!("write failed: {}", e)))
}

/// Read one frame; `Ok(None)` on a clean end of stream
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Transport(format!("read failed: {}", e))),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Transport(format!("truncated frame: {}", e)))?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Transport(format!("malformed frame: {}", e)))
}

/// Client half over any reader/writer pair
pub struct FramedAnalyzer<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> FramedAnalyzer<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        FramedAnalyzer { reader, writer }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.writer, request)?;
        read_frame(&mut self.reader)?
            .ok_or_else(|| Error::Transport("analyzer closed the stream".to_string()))
    }
}

impl<R: Read, W: Write> Analyzer for FramedAnalyzer<R, W> {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        let response = self.call(&Request::Source {
            path: path.to_path_buf(),
        })?;
        match response {
            Response {
                success: true,
                source: Some(summary),
                ..
            } => Ok(summary),
            Response { success: true, .. } => Err(Error::Transport(
                "source response without a summary".to_string(),
            )),
            Response { error, .. } => Err(Error::parse(
                path,
                error.unwrap_or_else(|| "unknown analyzer error".to_string()),
            )),
        }
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        let response = self.call(&Request::Manifest {
            path: path.to_path_buf(),
        })?;
        match response {
            Response {
                success: true,
                manifest: Some(summary),
                ..
            } => Ok(summary),
            Response { success: true, .. } => Err(Error::Transport(
                "manifest response without a summary".to_string(),
            )),
            Response { error, .. } => Err(Error::parse(
                path,
                error.unwrap_or_else(|| "unknown analyzer error".to_string()),
            )),
        }
    }
}

/// An analyzer child process speaking the framed protocol on its
/// stdin/stdout
pub struct ProcessAnalyzer {
    child: Child,
    channel: FramedAnalyzer<BufReader<ChildStdout>, BufWriter<ChildStdin>>,
}

impl ProcessAnalyzer {
    /// Spawn `program args...`
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        debug!(program = %program.display(), "spawning analyzer");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Transport(format!("cannot spawn {}: {}", program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("analyzer stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("analyzer stdout unavailable".to_string()))?;

        Ok(ProcessAnalyzer {
            child,
            channel: FramedAnalyzer::new(BufReader::new(stdout), BufWriter::new(stdin)),
        })
    }
}

impl Analyzer for ProcessAnalyzer {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        self.channel.analyze_source(path)
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        self.channel.analyze_manifest(path)
    }
}

impl Drop for ProcessAnalyzer {
    fn drop(&mut self) {
        // closing stdin ends the serve loop; don't leave a zombie behind
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!(error = %e, "failed to stop analyzer");
            }
        }
        let _ = self.child.wait();
    }
}

/// Answer requests until the client closes the stream. Analysis failures
/// are sent back as failed responses; transport failures end the loop.
pub fn serve<R: Read, W: Write, A: Analyzer>(
    reader: &mut R,
    writer: &mut W,
    analyzer: &mut A,
) -> Result<()> {
    while let Some(request) = read_frame::<_, Request>(reader)? {
        let response = match &request {
            Request::Source { path } => match analyzer.analyze_source(path) {
                Ok(summary) => Response {
                    success: true,
                    source: Some(summary),
                    ..Default::default()
                },
                Err(e) => Response::failure(e.to_string()),
            },
            Request::Manifest { path } => match analyzer.analyze_manifest(path) {
                Ok(summary) => Response {
                    success: true,
                    manifest: Some(summary),
                    ..Default::default()
                },
                Err(e) => Response::failure(e.to_string()),
            },
        };
        write_frame(writer, &response)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{Reference, SynAnalyzer};
    use std::io::Cursor;

    struct Scripted;

    impl Analyzer for Scripted {
        fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
            if path.ends_with("bad.rs") {
                return Err(Error::parse(path, "expected item"));
            }
            Ok(SourceSummary {
                references: vec![Reference::always("serde")],
                ..Default::default()
            })
        }

        fn analyze_manifest(&mut self, _path: &Path) -> Result<ManifestSummary> {
            Ok(ManifestSummary {
                package: "pkg".to_string(),
                ..Default::default()
            })
        }
    }

    fn frames(requests: &[Request]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in requests {
            write_frame(&mut out, r).unwrap();
        }
        out
    }

    #[test]
    fn test_serve_round_trip() {
        let input = frames(&[
            Request::Source {
                path: "a/good.rs".into(),
            },
            Request::Source {
                path: "a/bad.rs".into(),
            },
            Request::Manifest {
                path: "a/Cargo.toml".into(),
            },
        ]);
        let mut output = Vec::new();
        serve(&mut Cursor::new(input), &mut output, &mut Scripted).unwrap();

        let mut client = FramedAnalyzer::new(Cursor::new(output), Vec::new());
        let good = client.analyze_source(Path::new("a/good.rs")).unwrap();
        assert_eq!(good.references, vec![Reference::always("serde")]);

        let bad = client.analyze_source(Path::new("a/bad.rs")).unwrap_err();
        assert!(matches!(bad, Error::Parse { .. }));

        let manifest = client.analyze_manifest(Path::new("a/Cargo.toml")).unwrap();
        assert_eq!(manifest.package, "pkg");

        // the stream is exhausted
        let closed = client.analyze_source(Path::new("a/good.rs")).unwrap_err();
        assert!(matches!(closed, Error::Transport(_)));
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut input = Vec::new();
        input.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        let err = read_frame::<_, Response>(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_malformed_json_is_transport_error() {
        let body = b"{not json";
        let mut input = (body.len() as u32).to_le_bytes().to_vec();
        input.extend_from_slice(body);
        let err = read_frame::<_, Response>(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_truncated_frame() {
        let mut input = 10u32.to_le_bytes().to_vec();
        input.extend_from_slice(b"{}");
        let err = read_frame::<_, Response>(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_serve_with_syn_analyzer_reports_missing_file() {
        let input = frames(&[Request::Source {
            path: "/definitely/not/here.rs".into(),
        }]);
        let mut output = Vec::new();
        serve(&mut Cursor::new(input), &mut output, &mut SynAnalyzer::new()).unwrap();
        let response: Response = read_frame(&mut Cursor::new(output)).unwrap().unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("cannot read file"));
    }
}
