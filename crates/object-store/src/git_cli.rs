//! Object backend that queries the external `git` toolchain.
//!
//! Object names always travel over stdin (`cat-file --batch`), never as
//! command line options, so ref names cannot be mistaken for flags.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::backend::{BackendKind, BackendOptions, ObjectBackend};
use crate::error::{BackendError, Result};
use crate::process;
use crate::types::{parse_commit, parse_tree, Blob, CommitInfo, ObjectId, Reference, TreeEntry};

/// One record of `git cat-file --batch` output.
#[derive(Debug)]
enum BatchRecord {
    Found {
        id: ObjectId,
        object_type: String,
        declared_len: u64,
        data: Bytes,
    },
    Missing,
}

#[derive(Debug, Clone)]
pub struct GitCliBackend {
    path: PathBuf,
    options: BackendOptions,
}

impl GitCliBackend {
    pub fn new(path: &Path, options: BackendOptions) -> Self {
        Self {
            path: path.to_path_buf(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new(&self.options.git_binary);
        cmd.arg("--git-dir")
            .arg(&self.path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env_remove("GIT_DIR");
        cmd
    }

    fn ensure_exists(&self) -> Result<()> {
        if !self.path.is_dir() {
            return Err(BackendError::unavailable(format!(
                "repository {} does not exist",
                self.path.display()
            )));
        }
        Ok(())
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Bytes> {
        self.ensure_exists()?;

        let mut cmd = self.git();
        cmd.args(args);
        let output = process::run_checked(cmd, stdin, self.options.command_timeout)
            .await
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(Bytes::from(output.stdout))
    }

    async fn cat_batch(&self, inputs: &[String]) -> Result<Vec<BatchRecord>> {
        let mut stdin = String::new();
        for input in inputs {
            stdin.push_str(input);
            stdin.push('\n');
        }

        let output = self
            .run(&["cat-file", "--batch"], Some(stdin.as_bytes()))
            .await?;
        let records = parse_batch(output)?;
        if records.len() < inputs.len() {
            if let Some(BatchRecord::Found {
                declared_len, data, ..
            }) = records.last()
            {
                return Err(BackendError::Truncated {
                    expected: *declared_len,
                    actual: data.len() as u64,
                });
            }
            return Err(BackendError::corrupt("cat-file output ended early"));
        }
        Ok(records)
    }

    async fn cat_object(&self, id: &ObjectId, expected_type: &str) -> Result<(u64, Bytes)> {
        let mut records = self.cat_batch(&[id.to_hex()]).await?;
        match records.pop() {
            Some(BatchRecord::Found {
                object_type,
                declared_len,
                data,
                ..
            }) => {
                if object_type != expected_type {
                    return Err(BackendError::corrupt(format!(
                        "{id} is a {object_type}, expected a {expected_type}"
                    )));
                }
                Ok((declared_len, data))
            }
            Some(BatchRecord::Missing) => Err(BackendError::NotFound),
            None => Err(BackendError::corrupt("cat-file produced no output")),
        }
    }

    /// Stream one blob through `cat-file --batch`, keeping only the bytes in
    /// range. The child is killed once the range has been read.
    async fn stream_range(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        let mut cmd = self.git();
        cmd.args(["cat-file", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::unavailable(format!("failed to spawn git: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::unavailable("git stdin not captured"))?;
        stdin.write_all(format!("{}\n", id.to_hex()).as_bytes()).await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::unavailable("git stdout not captured"))?;
        let mut reader = BufReader::new(stdout);

        let mut header = Vec::new();
        reader.read_until(b'\n', &mut header).await?;
        let size = parse_blob_header(id, &header)?;
        read_range(&mut reader, size, offset, len).await
    }
}

/// Declared size from a single `cat-file --batch` header line.
fn parse_blob_header(id: &ObjectId, header: &[u8]) -> Result<u64> {
    if header.is_empty() {
        return Err(BackendError::unavailable("cat-file exited without output"));
    }
    let header = std::str::from_utf8(header)
        .map_err(|_| BackendError::corrupt("cat-file header is not utf-8"))?
        .trim_end_matches('\n');
    if header.ends_with(" missing") || header.ends_with(" ambiguous") {
        return Err(BackendError::NotFound);
    }

    let fields: Vec<&str> = header.split(' ').collect();
    match fields.as_slice() {
        [_, "blob", size] => size
            .parse()
            .map_err(|_| BackendError::corrupt(format!("invalid object size in {header:?}"))),
        [_, other, _] => Err(BackendError::corrupt(format!(
            "{id} is a {other}, expected a blob"
        ))),
        _ => Err(BackendError::corrupt(format!(
            "unexpected cat-file header {header:?}"
        ))),
    }
}

/// Skip `offset` bytes of a `size` byte object body, then read up to `len`.
async fn read_range<R>(reader: &mut R, size: u64, offset: u64, len: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    if offset >= size {
        return Ok(Bytes::new());
    }
    let want = len.min(size - offset);
    let skipped = tokio::io::copy(&mut (&mut *reader).take(offset), &mut tokio::io::sink()).await?;
    let mut buf = Vec::with_capacity(want as usize);
    (&mut *reader).take(want).read_to_end(&mut buf).await?;

    if skipped < offset || (buf.len() as u64) < want {
        return Err(BackendError::Truncated {
            expected: size,
            actual: skipped + buf.len() as u64,
        });
    }
    Ok(Bytes::from(buf))
}

#[async_trait]
impl ObjectBackend for GitCliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GitCli
    }

    async fn list_refs(&self) -> Result<Vec<Reference>> {
        let output = self
            .run(
                &[
                    "for-each-ref",
                    "--format=%(objectname) %(refname)",
                    "refs/heads",
                    "refs/tags",
                ],
                None,
            )
            .await?;

        let text = String::from_utf8_lossy(&output);
        let mut refs = Vec::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            let Some((hex, name)) = line.split_once(' ') else {
                return Err(BackendError::corrupt(format!(
                    "unexpected for-each-ref line {line:?}"
                )));
            };
            refs.push(Reference {
                name: name.to_string(),
                target: ObjectId::from_hex(hex)?,
            });
        }
        Ok(refs)
    }

    async fn resolve_ref(&self, name: &str) -> Result<CommitInfo> {
        let mut resolved = self.resolve_refs(&[name.to_string()]).await?;
        resolved.pop().unwrap_or(Err(BackendError::NotFound))
    }

    async fn resolve_refs(&self, names: &[String]) -> Result<Vec<Result<CommitInfo>>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = names.iter().map(|n| format!("{n}^{{commit}}")).collect();
        let records = self.cat_batch(&inputs).await?;

        Ok(records
            .into_iter()
            .map(|record| match record {
                BatchRecord::Found {
                    id,
                    object_type,
                    data,
                    ..
                } if object_type == "commit" => parse_commit(id, &data),
                BatchRecord::Found { .. } | BatchRecord::Missing => Err(BackendError::NotFound),
            })
            .collect())
    }

    async fn get_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>> {
        let (declared_len, data) = self.cat_object(id, "tree").await?;
        if declared_len != data.len() as u64 {
            return Err(BackendError::Truncated {
                expected: declared_len,
                actual: data.len() as u64,
            });
        }
        parse_tree(&data)
    }

    async fn get_blob(&self, id: &ObjectId) -> Result<Blob> {
        let (declared_len, data) = self.cat_object(id, "blob").await?;
        Ok(Blob { declared_len, data })
    }

    async fn blob_size(&self, id: &ObjectId) -> Result<u64> {
        let stdin = format!("{}\n", id.to_hex());
        let output = self
            .run(&["cat-file", "--batch-check"], Some(stdin.as_bytes()))
            .await?;
        let text = String::from_utf8_lossy(&output);
        let line = text.lines().next().unwrap_or_default();
        if line.ends_with(" missing") {
            return Err(BackendError::NotFound);
        }

        let fields: Vec<&str> = line.split(' ').collect();
        match fields.as_slice() {
            [_, "blob", size] => size
                .parse()
                .map_err(|_| BackendError::corrupt(format!("invalid object size in {line:?}"))),
            [_, other, _] => Err(BackendError::corrupt(format!(
                "{id} is a {other}, expected a blob"
            ))),
            _ => Err(BackendError::corrupt(format!(
                "unexpected batch-check line {line:?}"
            ))),
        }
    }

    async fn read_blob(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        self.ensure_exists()?;
        let timeout = self.options.command_timeout;
        match tokio::time::timeout(timeout, self.stream_range(id, offset, len)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%id, ?timeout, "cat-file range read timed out");
                Err(BackendError::unavailable(format!(
                    "git cat-file did not finish within {timeout:?}"
                )))
            }
        }
    }
}

/// Split `cat-file --batch` output into records. An object whose content is
/// cut short is returned with the bytes that did arrive and ends the parse.
fn parse_batch(output: Bytes) -> Result<Vec<BatchRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < output.len() {
        let line_end = output[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| pos + i)
            .ok_or_else(|| BackendError::corrupt("cat-file header without newline"))?;
        let header = std::str::from_utf8(&output[pos..line_end])
            .map_err(|_| BackendError::corrupt("cat-file header is not utf-8"))?;
        pos = line_end + 1;

        if header.ends_with(" missing") || header.ends_with(" ambiguous") {
            records.push(BatchRecord::Missing);
            continue;
        }

        let fields: Vec<&str> = header.split(' ').collect();
        let [hex, object_type, size] = fields.as_slice() else {
            return Err(BackendError::corrupt(format!(
                "unexpected cat-file header {header:?}"
            )));
        };
        let id = ObjectId::from_hex(hex)?;
        let declared_len: u64 = size
            .parse()
            .map_err(|_| BackendError::corrupt(format!("invalid object size in {header:?}")))?;

        let end = pos
            .saturating_add(declared_len as usize)
            .min(output.len());
        let data = output.slice(pos..end);
        let complete = data.len() as u64 == declared_len;

        records.push(BatchRecord::Found {
            id,
            object_type: object_type.to_string(),
            declared_len,
            data,
        });
        if !complete {
            break;
        }
        // Content is followed by a single LF.
        pos = end + 1;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_batch_records() {
        let raw = format!("{OID} blob 5\nhello\nrefs/heads/nope^{{commit}} missing\n{OID} blob 0\n\n");
        let records = parse_batch(Bytes::from(raw)).unwrap();
        assert_eq!(records.len(), 3);
        match &records[0] {
            BatchRecord::Found {
                object_type, data, ..
            } => {
                assert_eq!(object_type, "blob");
                assert_eq!(data.as_ref(), b"hello");
            }
            other => panic!("expected found record, got {:?}", other),
        }
        assert!(matches!(records[1], BatchRecord::Missing));
        assert!(matches!(
            &records[2],
            BatchRecord::Found { declared_len: 0, .. }
        ));
    }

    #[test]
    fn test_parse_batch_keeps_short_content() {
        let raw = format!("{OID} blob 10\nhello");
        let records = parse_batch(Bytes::from(raw)).unwrap();
        match &records[0] {
            BatchRecord::Found {
                declared_len, data, ..
            } => {
                assert_eq!(*declared_len, 10);
                assert_eq!(data.len(), 5);
            }
            other => panic!("expected found record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_batch_rejects_garbage() {
        let result = parse_batch(Bytes::from_static(b"what is this\n"));
        assert!(matches!(result, Err(BackendError::Corrupt(_))));
    }

    #[test]
    fn test_parse_blob_header() {
        let id = ObjectId::from_hex(OID).unwrap();
        assert_eq!(parse_blob_header(&id, format!("{OID} blob 42\n").as_bytes()), Ok(42));
        assert_eq!(
            parse_blob_header(&id, format!("{OID} missing\n").as_bytes()),
            Err(BackendError::NotFound)
        );
        assert!(matches!(
            parse_blob_header(&id, format!("{OID} tree 42\n").as_bytes()),
            Err(BackendError::Corrupt(_))
        ));
        assert!(matches!(
            parse_blob_header(&id, b""),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_read_range_skips_and_stops() {
        let mut body: &[u8] = b"0123456789\n";
        assert_eq!(read_range(&mut body, 10, 3, 4).await.unwrap(), &b"3456"[..]);
        // Only the requested bytes were consumed.
        assert_eq!(body, b"789\n");
    }

    #[tokio::test]
    async fn test_read_range_short_body_is_truncated() {
        let mut body: &[u8] = b"01234";
        assert_eq!(
            read_range(&mut body, 10, 2, 6).await,
            Err(BackendError::Truncated {
                expected: 10,
                actual: 5
            })
        );
    }

    #[tokio::test]
    async fn test_missing_repository_is_unavailable() {
        let backend = GitCliBackend::new(
            Path::new("/nonexistent/repo.git"),
            BackendOptions::default(),
        );
        let result = backend.list_refs().await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }
}
