//! [`PlayerHost`] over mpv's JSON IPC socket.
//!
//! A reader thread owns the read half of the socket. Replies are handed to the
//! caller waiting on their `request_id`; lifecycle events go to the service
//! channel. When the connection ends the reader sends exactly one
//! [`ServiceMessage::PlayerGone`].

use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use subresync_mpv_protocol::{
    parse_message, Message, Reply, Request, MAX_LINE_BYTES, PROPERTY_IDLE_ACTIVE,
    PROPERTY_PLAYBACK_TIME,
};
use tracing::{debug, warn};

use crate::host::{HostError, PlayerHost};
use crate::service::ServiceMessage;

const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type PendingReplies = Arc<Mutex<HashMap<u64, SyncSender<Reply>>>>;

pub struct MpvHost {
    writer: Mutex<UnixStream>,
    pending: PendingReplies,
    connected: Arc<AtomicBool>,
    next_request_id: AtomicU64,
}

impl MpvHost {
    pub fn connect(path: &Path, events: Sender<ServiceMessage>) -> Result<Self, HostError> {
        let stream = UnixStream::connect(path)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = stream.try_clone()?;

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_pending = Arc::clone(&pending);
        let reader_connected = Arc::clone(&connected);
        thread::Builder::new()
            .name("mpv-reader".to_string())
            .spawn(move || read_loop(reader, reader_pending, reader_connected, events))?;

        Ok(Self {
            writer: Mutex::new(stream),
            pending,
            connected,
            next_request_id: AtomicU64::new(1),
        })
    }

    fn request<F>(&self, build: F) -> Result<Option<Value>, HostError>
    where
        F: FnOnce(u64) -> Request,
    {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HostError::Disconnected);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = build(request_id);
        let command = request.name().to_string();
        let line = request
            .to_line()
            .map_err(|err| HostError::UnexpectedReply {
                command: command.clone(),
                detail: err.to_string(),
            })?;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.pending
            .lock()
            .map_err(|_| HostError::Disconnected)?
            .insert(request_id, reply_tx);

        if let Err(err) = self.write_line(&line) {
            self.forget(request_id);
            return Err(err);
        }

        let reply = match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                self.forget(request_id);
                return Err(HostError::Timeout {
                    command,
                    timeout: REPLY_TIMEOUT,
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(HostError::Disconnected),
        };

        if !reply.is_success() {
            return Err(HostError::Player {
                command,
                error: reply.error,
            });
        }
        Ok(reply.data)
    }

    fn write_line(&self, line: &[u8]) -> Result<(), HostError> {
        let mut writer = self.writer.lock().map_err(|_| HostError::Disconnected)?;
        writer.write_all(line)?;
        writer.flush()?;
        Ok(())
    }

    fn forget(&self, request_id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&request_id);
        }
    }

    fn get_property(&self, name: &str) -> Result<Value, HostError> {
        self.request(|id| Request::get_property(id, name))?
            .ok_or_else(|| HostError::UnexpectedReply {
                command: "get_property".to_string(),
                detail: format!("no data for {}", name),
            })
    }
}

impl PlayerHost for MpvHost {
    fn is_playing(&self) -> Result<bool, HostError> {
        let idle = self.get_property(PROPERTY_IDLE_ACTIVE)?;
        idle.as_bool()
            .map(|idle| !idle)
            .ok_or_else(|| HostError::UnexpectedReply {
                command: "get_property".to_string(),
                detail: format!("{} was not a boolean: {}", PROPERTY_IDLE_ACTIVE, idle),
            })
    }

    fn time(&self) -> Result<f64, HostError> {
        let position = self.get_property(PROPERTY_PLAYBACK_TIME)?;
        position.as_f64().ok_or_else(|| HostError::UnexpectedReply {
            command: "get_property".to_string(),
            detail: format!("{} was not a number: {}", PROPERTY_PLAYBACK_TIME, position),
        })
    }

    fn seek_time(&self, seconds: f64) -> Result<(), HostError> {
        self.request(|id| Request::seek_absolute(id, seconds))
            .map(|_| ())
    }

    fn step_back(&self) -> Result<(), HostError> {
        self.request(Request::frame_back_step).map(|_| ())
    }
}

impl Drop for MpvHost {
    fn drop(&mut self) {
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

fn read_loop(
    stream: UnixStream,
    pending: PendingReplies,
    connected: Arc<AtomicBool>,
    events: Sender<ServiceMessage>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let limit = MAX_LINE_BYTES as u64 + 1;

    loop {
        line.clear();
        match (&mut reader).take(limit).read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!("mpv closed the IPC socket");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "Failed to read from mpv socket");
                break;
            }
        }

        if line.last() != Some(&b'\n') && line.len() > MAX_LINE_BYTES {
            warn!(bytes = line.len(), "mpv message exceeded maximum size; disconnecting");
            break;
        }

        let message = trim_line(&line);
        if message.is_empty() {
            continue;
        }

        match parse_message(message) {
            Ok(Message::Reply(reply)) => deliver_reply(&pending, reply),
            Ok(Message::Event(event)) => {
                if event.is_shutdown() {
                    debug!("mpv is shutting down");
                    break;
                }
                if let Some(lifecycle) = event.lifecycle() {
                    debug!(event = %event.event, reason = ?event.reason, "mpv lifecycle event");
                    if events.send(ServiceMessage::Lifecycle(lifecycle)).is_err() {
                        break;
                    }
                }
            }
            Err(err) => debug!(error = %err, "Ignoring unrecognized mpv message"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    let _ = events.send(ServiceMessage::PlayerGone);
}

fn deliver_reply(pending: &PendingReplies, reply: Reply) {
    let waiter = match pending.lock() {
        Ok(mut pending) => pending.remove(&reply.request_id),
        Err(_) => None,
    };
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => debug!(request_id = reply.request_id, "Dropping unmatched mpv reply"),
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |index| index + 1);
    &line[start..end]
}
