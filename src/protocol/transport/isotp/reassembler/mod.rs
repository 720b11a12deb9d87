//! ISO-TP conversation reassembler: rebuilds one inbound message by
//! aggregating the consecutive frames that follow a first frame.
//!
//! One `Reassembler` lives in each flow-control filter slot, so at most one
//! conversation per filter is in flight. Frame types are decoded by the caller
//! ([`Pci::decode`]) and handed in already classified.
use alloc::vec::Vec;
use embassy_time::Instant;

use super::pci::Pci;

//==================================================================================Enums and Structs
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Frame does not advance any conversation (idle consecutive frame,
    /// unexpected sequence number, flow-control frame).
    Ignored,
    /// First frame accepted: the caller must answer with a flow-control frame
    /// and may announce the start of the transfer.
    Started { total_len: u16 },
    /// Consecutive frame appended, more bytes still expected.
    FragmentConsumed,
    /// Protocol violation: the conversation was dropped without delivering
    /// anything.
    Discarded,
    /// All expected bytes are present.
    MessageComplete(CompletedMessage),
}

/// Reassembled payload handed back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct CompletedMessage {
    pub payload: Vec<u8>,
    /// Timestamp of the single frame or first frame that opened the transfer.
    pub started_at: Instant,
}

/// Internal structure tracking one multi-frame transfer.
#[derive(Debug)]
struct Conversation {
    expected_len: usize,
    buffer: Vec<u8>,
    next_sequence: u8,
    started_at: Instant,
}

#[derive(Debug, Default)]
enum ConversationState {
    #[default]
    Idle,
    Collecting(Conversation),
}

/// Per-filter reassembly state machine.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: ConversationState,
}

impl Reassembler {
    /// Instantiate an idle reassembler.
    pub const fn new() -> Self {
        Self {
            state: ConversationState::Idle,
        }
    }

    /// `true` while a first frame has been accepted and bytes are still missing.
    pub fn is_collecting(&self) -> bool {
        matches!(self.state, ConversationState::Collecting(_))
    }

    /// Bytes gathered so far by the live conversation.
    pub fn received_len(&self) -> usize {
        match &self.state {
            ConversationState::Collecting(conversation) => conversation.buffer.len(),
            ConversationState::Idle => 0,
        }
    }

    /// Drop the live conversation, if any.
    pub fn abort(&mut self) {
        self.state = ConversationState::Idle;
    }

    //==================================================================================Process Functions
    /// Apply one frame to the conversation.
    ///
    /// * `pci` – header decoded from `body`
    /// * `body` – frame payload after the addressing prefix, PCI included
    /// * `prefix_len` – addressing prefix length (0 or 1), fixes frame capacities
    /// * `timestamp` – receive time of the frame
    pub fn process(
        &mut self,
        pci: Pci,
        body: &[u8],
        prefix_len: usize,
        timestamp: Instant,
    ) -> ProcessResult {
        match pci {
            Pci::Single { len } => {
                // A new single frame supersedes whatever was being collected.
                self.abort();
                let len = len as usize;
                if len > 7 - prefix_len {
                    return ProcessResult::Discarded;
                }
                ProcessResult::MessageComplete(CompletedMessage {
                    payload: body[1..1 + len].to_vec(),
                    started_at: timestamp,
                })
            }
            Pci::First { total_len } => {
                self.abort();
                let expected_len = total_len as usize;
                // A first frame always fills the CAN frame, and announces more
                // than a single frame could have carried.
                if body.len() != 8 - prefix_len || expected_len <= 7 - prefix_len {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("Malformed first frame, length {}", expected_len);
                    return ProcessResult::Discarded;
                }
                let mut buffer = Vec::with_capacity(expected_len);
                buffer.extend_from_slice(&body[2..]);
                self.state = ConversationState::Collecting(Conversation {
                    expected_len,
                    buffer,
                    next_sequence: 1,
                    started_at: timestamp,
                });
                ProcessResult::Started { total_len }
            }
            Pci::Consecutive { sequence } => self.process_consecutive(sequence, body, prefix_len),
            Pci::FlowControl { .. } => ProcessResult::Ignored,
        }
    }

    fn process_consecutive(&mut self, sequence: u8, body: &[u8], prefix_len: usize) -> ProcessResult {
        let ConversationState::Collecting(conversation) = &mut self.state else {
            return ProcessResult::Ignored;
        };

        // Repeated or reordered frames are skipped, not treated as errors.
        if sequence != conversation.next_sequence {
            #[cfg(feature = "defmt")]
            defmt::trace!(
                "Ignoring consecutive frame {}, expecting {}",
                sequence,
                conversation.next_sequence
            );
            return ProcessResult::Ignored;
        }

        let data = &body[1..];
        let remaining = conversation.expected_len - conversation.buffer.len();
        if data.len() < remaining && data.len() < 7 - prefix_len {
            // Short frame in the middle of a transfer.
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "Short consecutive frame ({} bytes, {} remaining): conversation dropped",
                data.len(),
                remaining
            );
            self.abort();
            return ProcessResult::Discarded;
        }

        let copy_len = data.len().min(remaining);
        conversation.buffer.extend_from_slice(&data[..copy_len]);
        conversation.next_sequence = (conversation.next_sequence + 1) & 0x0F;

        if conversation.buffer.len() < conversation.expected_len {
            return ProcessResult::FragmentConsumed;
        }

        match core::mem::take(&mut self.state) {
            ConversationState::Collecting(done) => {
                ProcessResult::MessageComplete(CompletedMessage {
                    payload: done.buffer,
                    started_at: done.started_at,
                })
            }
            ConversationState::Idle => ProcessResult::Ignored,
        }
    }
}
