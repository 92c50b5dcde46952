//! Two-step state exchange between replicas.
//!
//! A peer opens with [Message::SyncStep1] carrying its state vector and
//! receives a [Message::SyncStep2] with everything it is missing. Afterwards
//! both sides forward their transaction updates as [Message::Update].

use crate::doc::Doc;
use crate::encoding::{Cursor, Write};
use crate::error::{Error, Result};
use crate::state_vector::StateVector;
use crate::traits::{Decode, Encode};

const MSG_SYNC_STEP_1: u64 = 0;
const MSG_SYNC_STEP_2: u64 = 1;
const MSG_UPDATE: u64 = 2;

/// A frame of the sync protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The sender's state vector.
    SyncStep1(StateVector),
    /// A v1 update answering a state vector.
    SyncStep2(Vec<u8>),
    /// A v1 update produced by a transaction.
    Update(Vec<u8>),
}

impl Message {
    /// Open a sync exchange for `doc`.
    pub fn sync_step1(doc: &Doc) -> Message {
        Message::SyncStep1(doc.state_vector())
    }

    /// Serialize the frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::SyncStep1(sv) => {
                buf.write_var(MSG_SYNC_STEP_1);
                buf.write_buf(&sv.encode_v1());
            }
            Message::SyncStep2(update) => {
                buf.write_var(MSG_SYNC_STEP_2);
                buf.write_buf(update);
            }
            Message::Update(update) => {
                buf.write_var(MSG_UPDATE);
                buf.write_buf(update);
            }
        }
        buf
    }

    /// Parse a frame.
    pub fn decode(data: &[u8]) -> Result<Message> {
        let mut cursor = Cursor::new(data);
        let msg = match cursor.read_var()? {
            MSG_SYNC_STEP_1 => Message::SyncStep1(StateVector::decode_v1(cursor.read_buf()?)?),
            MSG_SYNC_STEP_2 => Message::SyncStep2(cursor.read_buf()?.to_vec()),
            MSG_UPDATE => Message::Update(cursor.read_buf()?.to_vec()),
            other => return Err(Error::UnknownMessage(other)),
        };
        Ok(msg)
    }
}

/// Apply `msg` to `doc` and return the reply, if the protocol asks for one.
pub fn handle(doc: &Doc, msg: Message, origin: Option<&str>) -> Result<Option<Message>> {
    match msg {
        Message::SyncStep1(sv) => Ok(Some(Message::SyncStep2(
            doc.encode_state_as_update_v1(&sv),
        ))),
        Message::SyncStep2(update) | Message::Update(update) => {
            doc.apply_update_v1(&update, origin)?;
            Ok(None)
        }
    }
}
