//! The remote-printer subprocess channel.
//!
//! Each configured printer gets a helper subprocess connected back to
//! the POS over a local stream socket. Frames are an opcode byte plus
//! typed fields. Writes buffer and force a flush past 4 KiB; otherwise
//! the buffer flushes at frame boundaries. A peer that produces eight
//! consecutive dead reads is declared gone: the channel emits
//! [`PrinterEvent::Dead`] and the control loop kills the entry.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use common::shutdown::ShutdownChannel;
use common::task::PosTask;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{PosError, PosResult};
use crate::test_event::{TestEvent, TestEventSender};

/// POS → printer opcodes.
pub mod opcode {
    pub const FILE: u8 = 1;
    pub const OPEN_DRAWER: u8 = 2;
    pub const CANCEL: u8 = 3;
    pub const DIE: u8 = 4;
    pub const WRITE_FLAGS: u8 = 5;

    /// Printer → POS opcodes.
    pub const SERVER_ERROR: u8 = 16;
    pub const SERVER_PRINTER_DONE: u8 = 17;
    pub const SERVER_BADFILE: u8 = 18;
}

/// Read failures tolerated before the peer is declared dead.
const DEAD_READ_LIMIT: u32 = 8;
/// Out-buffer size that forces an immediate flush.
const FORCE_FLUSH_BYTES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrinterCommand {
    /// Print a prepared job file.
    File(PathBuf),
    OpenDrawer,
    Cancel,
    WriteFlags(u32),
    /// Ask the subprocess to exit.
    Die,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrinterEvent {
    /// The peer reported an error; message verbatim.
    Error { printer: u8, message: String },
    /// The peer finished a job file (already deleted here).
    Done { printer: u8, path: PathBuf },
    /// The peer could not read a job file.
    BadFile { printer: u8, path: PathBuf },
    /// Eight consecutive dead reads; the channel is gone.
    Dead { printer: u8 },
}

/// Cloneable command handle for one printer channel.
#[derive(Clone)]
pub struct PrinterHandle {
    pub number: u8,
    cmd_tx: mpsc::Sender<PrinterCommand>,
}

impl PrinterHandle {
    pub async fn send(&self, command: PrinterCommand) -> PosResult<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| PosError::State("printer channel is gone"))
    }

    pub fn try_send(&self, command: PrinterCommand) -> PosResult<()> {
        self.cmd_tx
            .try_send(command)
            .map_err(|_| PosError::State("printer channel is gone"))
    }
}

// --- Frame codec --- //

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn encode_command(buf: &mut BytesMut, command: &PrinterCommand) {
    match command {
        PrinterCommand::File(path) => {
            buf.put_u8(opcode::FILE);
            put_str(buf, &path.to_string_lossy());
        }
        PrinterCommand::OpenDrawer => buf.put_u8(opcode::OPEN_DRAWER),
        PrinterCommand::Cancel => buf.put_u8(opcode::CANCEL),
        PrinterCommand::Die => buf.put_u8(opcode::DIE),
        PrinterCommand::WriteFlags(flags) => {
            buf.put_u8(opcode::WRITE_FLAGS);
            buf.put_u32_le(*flags);
        }
    }
}

/// One decoded printer → POS frame.
#[derive(Debug, PartialEq, Eq)]
enum ServerFrame {
    Error(String),
    Done(String),
    BadFile(String),
}

/// Pops one complete frame off `buf`, or `None` if more bytes are
/// needed. Unknown opcodes are a protocol error.
fn decode_frame(buf: &mut BytesMut) -> PosResult<Option<ServerFrame>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let code = buf[0];
    if buf.len() < 3 {
        return Ok(None);
    }
    let len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    if buf.len() < 3 + len {
        return Ok(None);
    }
    buf.advance(3);
    let body = buf.split_to(len);
    let text = String::from_utf8_lossy(&body).into_owned();
    match code {
        opcode::SERVER_ERROR => Ok(Some(ServerFrame::Error(text))),
        opcode::SERVER_PRINTER_DONE => Ok(Some(ServerFrame::Done(text))),
        opcode::SERVER_BADFILE => Ok(Some(ServerFrame::BadFile(text))),
        other => Err(PosError::protocol(format!(
            "unknown printer opcode {other}"
        ))),
    }
}

// --- Channel actor --- //

/// Spawns the channel actor over an established socket. Returns the
/// command handle and the actor task.
pub fn spawn_channel(
    number: u8,
    stream: UnixStream,
    event_tx: mpsc::Sender<PrinterEvent>,
    test_event_tx: TestEventSender,
    shutdown: ShutdownChannel,
) -> (PrinterHandle, PosTask<()>) {
    let (cmd_tx, mut cmd_rx) =
        mpsc::channel(common::constants::DEFAULT_CHANNEL_SIZE);
    let task = PosTask::spawn_named(
        format!("printer channel {number}"),
        async move {
            let (mut read_half, mut write_half) = stream.into_split();
            let mut out = BytesMut::with_capacity(FORCE_FLUSH_BYTES * 2);
            let mut input = BytesMut::with_capacity(1024);
            let mut read_buf = [0u8; 1024];
            let mut failures = 0u32;

            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => {
                        // Best effort: tell the subprocess to exit.
                        let mut dying = BytesMut::new();
                        encode_command(&mut dying, &PrinterCommand::Die);
                        let _ = write_half.write_all(&dying).await;
                        break;
                    }
                    maybe_cmd = cmd_rx.recv() => {
                        let Some(command) = maybe_cmd else { break };
                        let die = command == PrinterCommand::Die;
                        encode_command(&mut out, &command);
                        if out.len() > FORCE_FLUSH_BYTES {
                            debug!("printer {number}: forced flush");
                            if write_half.write_all(&out).await.is_err() {
                                warn!("printer {number}: write failed");
                            }
                            out.clear();
                        } else if cmd_rx.is_empty() {
                            // Frame boundary with nothing queued behind.
                            if write_half.write_all(&out).await.is_err() {
                                warn!("printer {number}: write failed");
                            }
                            out.clear();
                        }
                        if die {
                            break;
                        }
                    }
                    read = read_half.read(&mut read_buf) => {
                        match read {
                            Ok(0) | Err(_) => {
                                failures += 1;
                                if failures < DEAD_READ_LIMIT {
                                    continue;
                                }
                                error!(
                                    "printer {number}: peer dead after \
                                     {failures} failed reads",
                                );
                                let _ = event_tx
                                    .send(PrinterEvent::Dead {
                                        printer: number,
                                    })
                                    .await;
                                test_event_tx
                                    .send(TestEvent::PrinterChannelDied);
                                break;
                            }
                            Ok(n) => {
                                // Any successful read clears the counter,
                                // even one that carries an error frame.
                                failures = 0;
                                input.extend_from_slice(&read_buf[..n]);
                                if handle_frames(
                                    number,
                                    &mut input,
                                    &event_tx,
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!("printer channel {number} closed");
        },
    );
    (PrinterHandle { number, cmd_tx }, task)
}

async fn handle_frames(
    number: u8,
    input: &mut BytesMut,
    event_tx: &mpsc::Sender<PrinterEvent>,
) -> PosResult<()> {
    loop {
        match decode_frame(input) {
            Ok(None) => return Ok(()),
            Ok(Some(ServerFrame::Error(message))) => {
                error!("printer {number} error: {message}");
                let _ = event_tx
                    .send(PrinterEvent::Error {
                        printer: number,
                        message,
                    })
                    .await;
            }
            Ok(Some(ServerFrame::Done(path))) => {
                let path = PathBuf::from(path);
                // The job file is ours to clean up once printed.
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!(
                        "could not remove finished job {}: {e}",
                        path.display(),
                    );
                }
                let _ = event_tx
                    .send(PrinterEvent::Done {
                        printer: number,
                        path,
                    })
                    .await;
            }
            Ok(Some(ServerFrame::BadFile(path))) => {
                warn!("printer {number} rejected job file {path}");
                let _ = event_tx
                    .send(PrinterEvent::BadFile {
                        printer: number,
                        path: PathBuf::from(path),
                    })
                    .await;
            }
            Err(e) => {
                error!("printer {number}: {e:#}; dropping channel");
                return Err(e);
            }
        }
    }
}

/// Socket path for printer `number`.
pub fn socket_path(number: u8) -> PathBuf {
    PathBuf::from(format!("/tmp/vt_print{number}"))
}

/// Spawns the helper subprocess for one configured printer and waits
/// for it to connect back on the channel socket.
pub async fn spawn_printer_process(
    entry: &super::PrinterEntry,
    helper: &Path,
) -> PosResult<UnixStream> {
    let path = socket_path(entry.number);
    let _ = std::fs::remove_file(&path);
    let listener = tokio::net::UnixListener::bind(&path)?;

    tokio::process::Command::new(helper)
        .arg(entry.number.to_string())
        .arg(&entry.host)
        .arg(entry.port.to_string())
        .arg(entry.model.to_code().to_string())
        .spawn()?;

    let (stream, _addr) = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        listener.accept(),
    )
    .await
    .map_err(|_| {
        PosError::State("printer subprocess never connected")
    })??;
    Ok(stream)
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn encode_server_frame(code: u8, body: &str) -> Vec<u8> {
        let mut frame = vec![code];
        frame.extend_from_slice(&(body.len() as u16).to_le_bytes());
        frame.extend_from_slice(body.as_bytes());
        frame
    }

    #[test]
    fn decode_handles_partial_frames() {
        let mut buf = BytesMut::new();
        let frame =
            encode_server_frame(opcode::SERVER_ERROR, "out of paper");
        buf.extend_from_slice(&frame[..3]);
        assert_eq!(decode_frame(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[3..]);
        assert_eq!(
            decode_frame(&mut buf).unwrap(),
            Some(ServerFrame::Error("out of paper".into())),
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_server_frame(250, "?"));
        assert!(decode_frame(&mut buf).is_err());
    }

    #[tokio::test]
    async fn commands_frame_onto_the_wire() {
        let (pos_side, mut printer_side) = UnixStream::pair().unwrap();
        let (event_tx, _event_rx) = mpsc::channel(16);
        let shutdown = ShutdownChannel::new();
        let (handle, task) = spawn_channel(
            3,
            pos_side,
            event_tx,
            TestEventSender::noop(),
            shutdown.clone(),
        );

        handle
            .send(PrinterCommand::File("/tmp/vt_job1".into()))
            .await
            .unwrap();
        handle.send(PrinterCommand::OpenDrawer).await.unwrap();

        let mut received = vec![0u8; 64];
        let n = printer_side.read(&mut received).await.unwrap();
        let received = &received[..n];
        // FILE frame: opcode, u16 length, path bytes.
        assert_eq!(received[0], opcode::FILE);
        let len = u16::from_le_bytes([received[1], received[2]]) as usize;
        assert_eq!(&received[3..3 + len], b"/tmp/vt_job1");
        // OPEN_DRAWER may ride the same flush or the next one.
        if received.len() > 3 + len {
            assert_eq!(received[3 + len], opcode::OPEN_DRAWER);
        } else {
            let mut more = [0u8; 8];
            let n = printer_side.read(&mut more).await.unwrap();
            assert_eq!(more[..n], [opcode::OPEN_DRAWER]);
        }

        shutdown.send();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn server_done_frame_deletes_file_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("vt_job");
        std::fs::write(&job, b"receipt").unwrap();

        let (pos_side, mut printer_side) = UnixStream::pair().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let shutdown = ShutdownChannel::new();
        let (_handle, task) = spawn_channel(
            7,
            pos_side,
            event_tx,
            TestEventSender::noop(),
            shutdown.clone(),
        );

        let frame = encode_server_frame(
            opcode::SERVER_PRINTER_DONE,
            job.to_str().unwrap(),
        );
        printer_side.write_all(&frame).await.unwrap();

        let event = event_rx.recv().await.unwrap();
        assert_eq!(
            event,
            PrinterEvent::Done {
                printer: 7,
                path: job.clone(),
            },
        );
        assert!(!job.exists());

        shutdown.send();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dead_peer_reported_after_eight_reads() {
        let (pos_side, printer_side) = UnixStream::pair().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let shutdown = ShutdownChannel::new();
        let (_handle, task) = spawn_channel(
            5,
            pos_side,
            event_tx,
            TestEventSender::noop(),
            shutdown,
        );

        // Closing the peer makes every subsequent read return 0.
        drop(printer_side);

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event, PrinterEvent::Dead { printer: 5 });
        task.await.unwrap();
    }
}
