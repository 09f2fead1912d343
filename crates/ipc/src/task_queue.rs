//! Bounded, named FIFO carrying task and terminate messages.
//!
//! Backed by a POSIX message queue. The coordinator is the only producer;
//! workers compete for messages and each message reaches exactly one of them.

use crate::errors::IpcError;
use crate::names::{MAX_FILENAME, validate_name};
use nix::errno::Errno;
use nix::mqueue::{
    MQ_OFlag, MqAttr, MqdT, mq_close, mq_getattr, mq_open, mq_receive, mq_remove_nonblock,
    mq_send, mq_set_nonblock, mq_unlink,
};
use nix::sys::stat::Mode;

const KIND_OFFSET: usize = 0;
const SEQUENCE_OFFSET: usize = 4;
const LENGTH_OFFSET: usize = 12;
const FILENAME_OFFSET: usize = 14;

/// Size of every message on the wire.
pub const MESSAGE_SIZE: usize = FILENAME_OFFSET + MAX_FILENAME;

/// Sequence carried by terminate messages.
pub const TERMINATE_SEQUENCE: u64 = u64::MAX;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Task = 1,
    Terminate = 2,
}

impl MessageKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(MessageKind::Task),
            2 => Some(MessageKind::Terminate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMessage {
    pub kind: MessageKind,
    pub filename: String,
    pub sequence: u64,
}

impl TaskMessage {
    /// Build a task message. Filenames over `MAX_FILENAME` bytes are truncated
    /// at a character boundary, never rejected.
    pub fn task(filename: &str, sequence: u64) -> Self {
        Self {
            kind: MessageKind::Task,
            filename: truncate_utf8(filename, MAX_FILENAME).to_string(),
            sequence,
        }
    }

    pub fn terminate() -> Self {
        Self {
            kind: MessageKind::Terminate,
            filename: String::new(),
            sequence: TERMINATE_SEQUENCE,
        }
    }

    pub fn is_terminate(&self) -> bool {
        self.kind == MessageKind::Terminate
    }

    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0u8; MESSAGE_SIZE];
        let name = truncate_utf8(&self.filename, MAX_FILENAME).as_bytes();

        buf[KIND_OFFSET..SEQUENCE_OFFSET].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[SEQUENCE_OFFSET..LENGTH_OFFSET].copy_from_slice(&self.sequence.to_le_bytes());
        buf[LENGTH_OFFSET..FILENAME_OFFSET].copy_from_slice(&(name.len() as u16).to_le_bytes());
        buf[FILENAME_OFFSET..FILENAME_OFFSET + name.len()].copy_from_slice(name);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcError> {
        if buf.len() < FILENAME_OFFSET {
            return Err(IpcError::MalformedMessage(format!(
                "{} bytes is shorter than the message header",
                buf.len()
            )));
        }

        let kind_raw = u32::from_le_bytes(read_array(buf, KIND_OFFSET));
        let kind = MessageKind::from_u32(kind_raw)
            .ok_or_else(|| IpcError::MalformedMessage(format!("unknown kind {kind_raw}")))?;
        let sequence = u64::from_le_bytes(read_array(buf, SEQUENCE_OFFSET));
        let len = u16::from_le_bytes(read_array(buf, LENGTH_OFFSET)) as usize;

        if len > MAX_FILENAME || FILENAME_OFFSET + len > buf.len() {
            return Err(IpcError::MalformedMessage(format!(
                "filename length {len} out of bounds"
            )));
        }

        let filename =
            String::from_utf8_lossy(&buf[FILENAME_OFFSET..FILENAME_OFFSET + len]).into_owned();

        Ok(Self {
            kind,
            filename,
            sequence,
        })
    }
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Handle to the named task queue.
///
/// Every participant opens its own handle; the coordinator destroys the name
/// once every worker has exited.
pub struct TaskQueue {
    name: String,
    mqd: Option<MqdT>,
    capacity: usize,
}

impl TaskQueue {
    /// Create a fresh queue holding at most `capacity` messages, unlinking any
    /// stale queue of the same name first.
    pub fn create(name: &str, capacity: usize) -> Result<Self, IpcError> {
        validate_name(name)?;
        if capacity == 0 {
            return Err(IpcError::InvalidName(format!(
                "{name} (capacity must be positive)"
            )));
        }

        match mq_unlink(name) {
            Ok(()) => tracing::debug!(name, "Removed stale task queue"),
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(e.into()),
        }

        let attr = MqAttr::new(0, capacity as _, MESSAGE_SIZE as _, 0);
        let mqd = mq_open(
            name,
            MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR | MQ_OFlag::O_CLOEXEC,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        )?;

        Ok(Self {
            name: name.to_string(),
            mqd: Some(mqd),
            capacity,
        })
    }

    /// Attach to a queue created by the coordinator.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        validate_name(name)?;
        let mqd = mq_open(
            name,
            MQ_OFlag::O_RDWR | MQ_OFlag::O_CLOEXEC,
            Mode::empty(),
            None,
        )?;

        let attr = mq_getattr(&mqd)?;
        if attr.msgsize() as usize != MESSAGE_SIZE {
            let _ = mq_close(mqd);
            return Err(IpcError::MalformedMessage(format!(
                "queue {name} carries {}-byte messages, expected {MESSAGE_SIZE}",
                attr.msgsize()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            mqd: Some(mqd),
            capacity: attr.maxmsg() as usize,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn mqd(&self) -> Result<&MqdT, IpcError> {
        self.mqd
            .as_ref()
            .ok_or_else(|| IpcError::Uninitialized(format!("task queue {} is closed", self.name)))
    }

    /// Enqueue a message. Blocks while the queue is full unless the handle is
    /// non-blocking, in which case a full queue yields `IpcError::WouldBlock`.
    pub fn send(&self, message: &TaskMessage) -> Result<(), IpcError> {
        let bytes = message.encode();
        loop {
            match mq_send(self.mqd()?, &bytes, 0) {
                Ok(()) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Err(IpcError::WouldBlock),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Enqueue one terminate message. One is needed per worker.
    pub fn send_terminate(&self) -> Result<(), IpcError> {
        self.send(&TaskMessage::terminate())
    }

    /// Dequeue the oldest message, blocking until one is available.
    ///
    /// An interrupted wait is reported as a transient error so the caller
    /// decides whether to poll again.
    pub fn receive(&self) -> Result<TaskMessage, IpcError> {
        let mut buf = [0u8; MESSAGE_SIZE];
        let mut priority = 0u32;
        match mq_receive(self.mqd()?, &mut buf, &mut priority) {
            Ok(len) => TaskMessage::decode(&buf[..len]),
            Err(Errno::EAGAIN) => Err(IpcError::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), IpcError> {
        if nonblocking {
            mq_set_nonblock(self.mqd()?)?;
        } else {
            mq_remove_nonblock(self.mqd()?)?;
        }
        Ok(())
    }

    /// Messages currently waiting in the queue.
    pub fn pending(&self) -> Result<usize, IpcError> {
        Ok(mq_getattr(self.mqd()?)?.curmsgs() as usize)
    }

    pub fn unlink(name: &str) -> Result<(), IpcError> {
        mq_unlink(name)?;
        Ok(())
    }

    /// Close this handle and remove the queue name.
    pub fn destroy(mut self) -> Result<(), IpcError> {
        if let Some(mqd) = self.mqd.take() {
            mq_close(mqd)?;
        }
        Self::unlink(&self.name)
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take()
            && let Err(e) = mq_close(mqd)
        {
            tracing::warn!(queue = %self.name, error = %e, "Failed to close task queue");
        }
    }
}
