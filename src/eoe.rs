//! Ethernet over EtherCAT fragment transfer
//!
//! EoE tunnels whole layer-2 frames through mailbox datagrams that are far
//! smaller than the frames themselves. Every mailbox payload starts with a
//! fragment header; fragment 0 additionally declares the total frame size.
//! [`Fragmenter`] splits an outbound frame into ordered fragments and pushes
//! them through the [`MailboxTransport`] collaborator; [`Reassembler`]
//! rebuilds inbound frames and hands the completed buffer to the bridging
//! layer exactly once.
//!
//! There is a single reassembly context per slave, not per frame: fragment 0
//! of a new frame silently abandons whatever incomplete frame preceded it.
//! Any protocol violation discards the in-progress frame without retry; the
//! peer resends the whole frame, detected at a higher layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};

use crate::coding::{self, BufExt, BufMutExt, Codec};
use crate::config::EoeConfig;
use crate::Timeout;

/// Flag bit marking the final fragment of a frame
const LAST_FRAGMENT: u8 = 0x01;

/// Header size on fragment 0, which carries the total frame size
pub const HEADER_SIZE_FIRST: usize = 8;
/// Header size on every subsequent fragment
pub const HEADER_SIZE: usize = 6;

/// Per-fragment header, little-endian on the wire
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FragmentHeader {
    /// Frame identity; constant across all fragments of one frame
    pub frame_number: u16,
    /// 0-based position within the frame, advancing by exactly one
    pub fragment_number: u8,
    /// Set on the final fragment
    pub last: bool,
    /// Byte offset of this fragment's payload within the frame
    pub frame_offset: u16,
    /// Total frame size; present exactly when `fragment_number == 0`
    pub total_size: Option<u16>,
}

impl FragmentHeader {
    /// Encoded size of this header
    pub fn size(&self) -> usize {
        if self.fragment_number == 0 {
            HEADER_SIZE_FIRST
        } else {
            HEADER_SIZE
        }
    }
}

impl Codec for FragmentHeader {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        let frame_number = buf.get::<u16>()?;
        let fragment_number = buf.get::<u8>()?;
        let flags = buf.get::<u8>()?;
        let frame_offset = buf.get::<u16>()?;
        let total_size = if fragment_number == 0 {
            Some(buf.get::<u16>()?)
        } else {
            None
        };
        Ok(Self {
            frame_number,
            fragment_number,
            last: flags & LAST_FRAGMENT != 0,
            frame_offset,
            total_size,
        })
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        debug_assert_eq!(self.fragment_number == 0, self.total_size.is_some());
        buf.write(self.frame_number);
        buf.write(self.fragment_number);
        buf.write(if self.last { LAST_FRAGMENT } else { 0 });
        buf.write(self.frame_offset);
        if let Some(total) = self.total_size {
            buf.write(total);
        }
    }
}

/// Mailbox send path supplied by the surrounding master
pub trait MailboxTransport {
    /// Submit one mailbox datagram to `slave`, blocking up to `timeout`
    fn send(&mut self, slave: u16, datagram: &[u8], timeout: Timeout) -> Result<(), TransportError>;
}

/// Failure of a single mailbox send
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum TransportError {
    /// The slave did not accept the datagram before the deadline
    #[error("mailbox send timed out")]
    Timeout,
    /// The slave rejected the datagram
    #[error("mailbox send rejected")]
    Rejected,
}

/// Failure to send a whole frame
#[derive(Debug, Error)]
pub enum SendError {
    /// Empty frames cannot be tunneled
    #[error("frame is empty")]
    EmptyFrame,
    /// The frame cannot be expressed in the fragment header's 16-bit fields
    #[error("frame of {0} bytes exceeds the EoE frame size limit")]
    FrameTooLarge(usize),
    /// A fragment send failed; the remainder of the frame was abandoned
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Splits outbound frames into mailbox-sized fragments for one slave
///
/// Frame numbers advance per frame (wrapping), so a new frame never reuses
/// the number of the frame currently in flight to the slave. The first
/// fragment the transport refuses aborts the whole send; nothing is retried
/// and no partial state is kept.
#[derive(Debug)]
pub struct Fragmenter {
    slave: u16,
    payload_cap: usize,
    next_frame: u16,
}

impl Fragmenter {
    /// Create a fragmenter for `slave` using the mailbox sizing in `config`
    pub fn new(slave: u16, config: &EoeConfig) -> Self {
        Self {
            slave,
            payload_cap: config.payload_capacity(),
            next_frame: 0,
        }
    }

    /// Per-fragment payload capacity
    pub fn payload_capacity(&self) -> usize {
        self.payload_cap
    }

    /// Tunnel `frame` to the slave as `ceil(len / capacity)` fragments
    pub fn send<T: MailboxTransport>(
        &mut self,
        frame: &[u8],
        transport: &mut T,
        timeout: Timeout,
    ) -> Result<(), SendError> {
        if frame.is_empty() {
            return Err(SendError::EmptyFrame);
        }
        // Both the offset field and the fragment counter bound the frame size
        if frame.len() > usize::from(u16::MAX) || frame.len() > self.payload_cap * 256 {
            return Err(SendError::FrameTooLarge(frame.len()));
        }
        let frame_number = self.next_frame;
        self.next_frame = self.next_frame.wrapping_add(1);

        let mut offset = 0;
        let mut fragment_number = 0u8;
        while offset < frame.len() {
            let chunk = (frame.len() - offset).min(self.payload_cap);
            let last = offset + chunk == frame.len();
            let header = FragmentHeader {
                frame_number,
                fragment_number,
                last,
                frame_offset: offset as u16,
                total_size: (fragment_number == 0).then(|| frame.len() as u16),
            };
            let mut datagram = BytesMut::with_capacity(header.size() + chunk);
            header.encode(&mut datagram);
            datagram.put_slice(&frame[offset..offset + chunk]);
            trace!(
                slave = self.slave,
                frame = frame_number,
                fragment = fragment_number,
                last,
                "send EoE fragment"
            );
            transport.send(self.slave, &datagram, timeout)?;
            offset += chunk;
            fragment_number = fragment_number.wrapping_add(1);
        }
        Ok(())
    }
}

/// Violation detected while consuming an inbound fragment
///
/// Every variant resets the slave's reassembly context; the partial frame is
/// discarded and never delivered.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ReassemblyError {
    /// The datagram ended inside the fragment header
    #[error("fragment header truncated")]
    Truncated,
    /// Fragment 0 declared a frame larger than the receive buffer
    #[error("declared frame size {declared} exceeds buffer capacity {capacity}")]
    FrameTooLarge {
        /// Size announced by fragment 0
        declared: usize,
        /// Receive buffer capacity
        capacity: usize,
    },
    /// Frame or fragment number did not continue the in-progress frame
    #[error("unexpected fragment {fragment} of frame {frame}")]
    OutOfSequence {
        /// Frame number carried by the offending fragment
        frame: u16,
        /// Fragment number carried by the offending fragment
        fragment: u8,
    },
    /// The fragment's declared offset disagrees with the bytes accumulated
    #[error("fragment offset {got} does not match accumulated offset {expected}")]
    OffsetMismatch {
        /// Offset carried by the fragment
        got: usize,
        /// Offset the context had accumulated
        expected: usize,
    },
    /// The payload would run past the declared frame size
    #[error("fragment overruns the declared frame size")]
    Overflow,
    /// The last fragment ended short of the declared frame size
    #[error("frame ended short of its declared size")]
    ShortFrame,
}

/// Rebuilds inbound frames from one slave's fragment stream
#[derive(Debug)]
pub struct Reassembler {
    frame_number: u16,
    expected_fragment: u8,
    offset: usize,
    declared_size: usize,
    buf: Box<[u8]>,
    active: bool,
}

impl Reassembler {
    /// Create a reassembly context with the receive buffer sized by `config`
    pub fn new(config: &EoeConfig) -> Self {
        Self {
            frame_number: 0,
            expected_fragment: 0,
            offset: 0,
            declared_size: 0,
            buf: vec![0; config.rx_buffer_size].into_boxed_slice(),
            active: false,
        }
    }

    /// Receive buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Consume one mailbox datagram
    ///
    /// Returns `Ok(Some(frame))` exactly once when the last fragment lands
    /// and the accumulated bytes match the declared size, `Ok(None)` while
    /// accumulating, and `Err` on any violation, after which the context is
    /// reset and the partial frame dropped.
    pub fn consume(&mut self, mut datagram: Bytes) -> Result<Option<Bytes>, ReassemblyError> {
        let header = FragmentHeader::decode(&mut datagram).map_err(|_| {
            self.reset();
            ReassemblyError::Truncated
        })?;
        let payload = datagram;

        if header.fragment_number == 0 {
            // A fresh frame implicitly abandons any incomplete predecessor
            let declared = usize::from(header.total_size.expect("fragment 0 carries total_size"));
            if declared > self.buf.len() {
                self.reset();
                return Err(ReassemblyError::FrameTooLarge {
                    declared,
                    capacity: self.buf.len(),
                });
            }
            if self.active {
                debug!(
                    frame = self.frame_number,
                    "incomplete frame abandoned by new fragment 0"
                );
            }
            self.frame_number = header.frame_number;
            self.expected_fragment = 0;
            self.offset = 0;
            self.declared_size = declared;
            self.active = true;
        } else if !self.active
            || header.frame_number != self.frame_number
            || header.fragment_number != self.expected_fragment
        {
            self.reset();
            return Err(ReassemblyError::OutOfSequence {
                frame: header.frame_number,
                fragment: header.fragment_number,
            });
        }

        let frame_offset = usize::from(header.frame_offset);
        if frame_offset != self.offset {
            self.reset();
            return Err(ReassemblyError::OffsetMismatch {
                got: frame_offset,
                expected: self.offset,
            });
        }
        if self.offset + payload.len() > self.declared_size {
            self.reset();
            return Err(ReassemblyError::Overflow);
        }

        self.buf[self.offset..self.offset + payload.len()].copy_from_slice(&payload);
        self.offset += payload.len();
        self.expected_fragment = self.expected_fragment.wrapping_add(1);
        trace!(
            frame = self.frame_number,
            fragment = header.fragment_number,
            offset = self.offset,
            "EoE fragment accepted"
        );

        if header.last {
            if self.offset != self.declared_size {
                self.reset();
                return Err(ReassemblyError::ShortFrame);
            }
            let frame = Bytes::copy_from_slice(&self.buf[..self.offset]);
            self.reset();
            return Ok(Some(frame));
        }
        Ok(None)
    }

    /// Drop any in-progress frame and await a fresh fragment 0
    pub fn reset(&mut self) {
        self.frame_number = 0;
        self.expected_fragment = 0;
        self.offset = 0;
        self.declared_size = 0;
        self.active = false;
    }
}
