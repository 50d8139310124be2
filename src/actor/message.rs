//! Messages exchanged between actors.
//!
//! A message is the only way actors talk to each other. It never carries the
//! payload itself, only a handle into the shared register store plus the
//! stamps the producer wrote on the register.

use crate::actor::id::{ActorId, RegstDescId, RegstHandle};

/// What a message announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// Producer → consumer: the register is readable.
    RegstReady,
    /// Consumer → producer: the consumer no longer needs the register.
    RegstReturned,
}

/// Immutable envelope for one register transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorMsg {
    src: ActorId,
    dst: ActorId,
    kind: MsgKind,
    handle: RegstHandle,
    piece_id: u64,
    model_version_id: Option<u64>,
}

impl ActorMsg {
    pub fn regst_ready(
        src: ActorId,
        dst: ActorId,
        handle: RegstHandle,
        piece_id: u64,
        model_version_id: Option<u64>,
    ) -> Self {
        Self {
            src,
            dst,
            kind: MsgKind::RegstReady,
            handle,
            piece_id,
            model_version_id,
        }
    }

    pub fn regst_returned(
        src: ActorId,
        dst: ActorId,
        handle: RegstHandle,
        piece_id: u64,
        model_version_id: Option<u64>,
    ) -> Self {
        Self {
            src,
            dst,
            kind: MsgKind::RegstReturned,
            handle,
            piece_id,
            model_version_id,
        }
    }

    #[inline]
    pub fn src(&self) -> ActorId {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> ActorId {
        self.dst
    }

    #[inline]
    pub fn kind(&self) -> MsgKind {
        self.kind
    }

    #[inline]
    pub fn handle(&self) -> RegstHandle {
        self.handle
    }

    #[inline]
    pub fn regst_desc_id(&self) -> RegstDescId {
        self.handle.desc_id
    }

    #[inline]
    pub fn piece_id(&self) -> u64 {
        self.piece_id
    }

    #[inline]
    pub fn model_version_id(&self) -> Option<u64> {
        self.model_version_id
    }

    #[inline]
    pub fn is_return(&self) -> bool {
        self.kind == MsgKind::RegstReturned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_message_fields() {
        let h = RegstHandle::new(RegstDescId(4), 1, 3);
        let msg = ActorMsg::regst_ready(ActorId(0), ActorId(2), h, 17, Some(4));
        assert_eq!(msg.src(), ActorId(0));
        assert_eq!(msg.dst(), ActorId(2));
        assert_eq!(msg.regst_desc_id(), RegstDescId(4));
        assert_eq!(msg.piece_id(), 17);
        assert_eq!(msg.model_version_id(), Some(4));
        assert!(!msg.is_return());
    }

    #[test]
    fn test_return_message() {
        let h = RegstHandle::new(RegstDescId(4), 0, 1);
        let msg = ActorMsg::regst_returned(ActorId(2), ActorId(0), h, 0, None);
        assert_eq!(msg.kind(), MsgKind::RegstReturned);
        assert!(msg.is_return());
    }
}
