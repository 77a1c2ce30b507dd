//! In-process model of the queue delivery contract.
//!
//! At-least-once delivery with a per-message visibility lease: a received
//! message is invisible until it is acknowledged or its lease expires, after
//! which it is redelivered. Once a message has been received
//! `max_receive_count` times without an ack, the next receive moves it to the
//! dead-letter list instead of delivering it again. Time is supplied by the
//! caller in milliseconds so tests can drive lease expiry deterministically.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::error::{FailureClass, PipelineError};

pub const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 360_000;
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub visibility_timeout_ms: u64,
    pub max_receive_count: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: DEFAULT_VISIBILITY_TIMEOUT_MS,
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),
    #[error("receipt handle {0} is no longer current; the lease expired")]
    StaleReceipt(String),
}

impl From<DeliveryError> for PipelineError {
    fn from(error: DeliveryError) -> Self {
        PipelineError::Internal(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    Visible,
    InFlight { lease_expires_at_ms: u64 },
}

/// A message handed to a consumer together with its lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub lease_expires_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    body: String,
    sent_at_ms: u64,
    receive_count: u32,
    state: MessageState,
}

#[derive(Debug, Default)]
pub struct LeaseQueue {
    policy: DeliveryPolicy,
    next_sequence: u64,
    // Keyed by sequence so receives are oldest-first.
    messages: BTreeMap<u64, QueuedMessage>,
    dead_letters: Vec<DeadLetter>,
}

impl LeaseQueue {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn send(&mut self, body: impl Into<String>, now_ms: u64) -> String {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.messages.insert(
            sequence,
            QueuedMessage {
                body: body.into(),
                sent_at_ms: now_ms,
                receive_count: 0,
                state: MessageState::Visible,
            },
        );
        message_id(sequence)
    }

    /// Leases up to `max_messages` visible messages.
    pub fn receive(&mut self, now_ms: u64, max_messages: usize) -> Vec<LeasedMessage> {
        let mut leased = Vec::new();
        let mut exhausted = Vec::new();

        for (sequence, message) in self.messages.iter_mut() {
            if leased.len() >= max_messages {
                break;
            }
            let visible = match message.state {
                MessageState::Visible => true,
                MessageState::InFlight {
                    lease_expires_at_ms,
                } => lease_expires_at_ms <= now_ms,
            };
            if !visible || message.sent_at_ms > now_ms {
                continue;
            }
            if message.receive_count >= self.policy.max_receive_count {
                exhausted.push(*sequence);
                continue;
            }

            message.receive_count += 1;
            let lease_expires_at_ms = now_ms.saturating_add(self.policy.visibility_timeout_ms);
            message.state = MessageState::InFlight {
                lease_expires_at_ms,
            };
            leased.push(LeasedMessage {
                message_id: message_id(*sequence),
                body: message.body.clone(),
                receipt_handle: receipt_handle(*sequence, message.receive_count),
                receive_count: message.receive_count,
                lease_expires_at_ms,
            });
        }

        for sequence in exhausted {
            self.move_to_dead_letter(sequence, "max receive count exceeded".to_string());
        }
        leased
    }

    /// Removes a message whose lease is still held by `receipt_handle`.
    pub fn ack(&mut self, receipt_handle: &str, now_ms: u64) -> Result<(), DeliveryError> {
        let sequence = self.current_lease(receipt_handle, now_ms)?;
        self.messages.remove(&sequence);
        Ok(())
    }

    /// Routes a leased message straight to the dead-letter list.
    pub fn dead_letter(
        &mut self,
        receipt_handle: &str,
        reason: impl Into<String>,
        now_ms: u64,
    ) -> Result<(), DeliveryError> {
        let sequence = self.current_lease(receipt_handle, now_ms)?;
        self.move_to_dead_letter(sequence, reason.into());
        Ok(())
    }

    pub fn state_of(&self, message_id: &str) -> Option<&MessageState> {
        let sequence = parse_message_id(message_id)?;
        self.messages.get(&sequence).map(|message| &message.state)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn in_flight_count(&self, now_ms: u64) -> usize {
        self.messages
            .values()
            .filter(|message| match message.state {
                MessageState::InFlight {
                    lease_expires_at_ms,
                } => lease_expires_at_ms > now_ms,
                MessageState::Visible => false,
            })
            .count()
    }

    pub fn dead_letters(&self) -> &[DeadLetter] {
        &self.dead_letters
    }

    fn current_lease(&self, receipt_handle: &str, now_ms: u64) -> Result<u64, DeliveryError> {
        let (sequence, receive_count) = parse_receipt_handle(receipt_handle)
            .ok_or_else(|| DeliveryError::UnknownReceipt(receipt_handle.to_string()))?;
        let message = self
            .messages
            .get(&sequence)
            .ok_or_else(|| DeliveryError::UnknownReceipt(receipt_handle.to_string()))?;

        match message.state {
            MessageState::InFlight {
                lease_expires_at_ms,
            } if message.receive_count == receive_count && lease_expires_at_ms > now_ms => {
                Ok(sequence)
            }
            _ => Err(DeliveryError::StaleReceipt(receipt_handle.to_string())),
        }
    }

    fn move_to_dead_letter(&mut self, sequence: u64, reason: String) {
        if let Some(message) = self.messages.remove(&sequence) {
            self.dead_letters.push(DeadLetter {
                message_id: message_id(sequence),
                body: message.body,
                receive_count: message.receive_count,
                reason,
            });
        }
    }
}

/// What happened to the message driven by [`process_next`].
#[derive(Debug)]
pub enum DeliveryOutcome<T> {
    /// Handler succeeded and the message was acknowledged.
    Completed { message_id: String, output: T },
    /// Handler failed; the message stays leased and is redelivered after expiry.
    Failed {
        message_id: String,
        error: PipelineError,
        redeliverable_at_ms: u64,
    },
    /// Handler reported malformed input; the message was dead-lettered at once.
    DeadLettered {
        message_id: String,
        error: PipelineError,
    },
}

/// Receives one message and drives it through
/// `Received -> Processing -> {Completed | Failed}`.
///
/// Returns `Ok(None)` when no message is visible at `now_ms`.
pub fn process_next<T>(
    queue: &mut LeaseQueue,
    now_ms: u64,
    handler: impl FnOnce(&LeasedMessage) -> Result<T, PipelineError>,
) -> Result<Option<DeliveryOutcome<T>>, DeliveryError> {
    let Some(message) = queue.receive(now_ms, 1).into_iter().next() else {
        return Ok(None);
    };

    let outcome = match handler(&message) {
        Ok(output) => {
            queue.ack(&message.receipt_handle, now_ms)?;
            DeliveryOutcome::Completed {
                message_id: message.message_id,
                output,
            }
        }
        Err(error) if error.class() == FailureClass::Malformed => {
            queue.dead_letter(&message.receipt_handle, error.to_string(), now_ms)?;
            DeliveryOutcome::DeadLettered {
                message_id: message.message_id,
                error,
            }
        }
        Err(error) => DeliveryOutcome::Failed {
            message_id: message.message_id,
            error,
            redeliverable_at_ms: message.lease_expires_at_ms,
        },
    };
    Ok(Some(outcome))
}

fn message_id(sequence: u64) -> String {
    format!("msg-{sequence:08}")
}

fn parse_message_id(message_id: &str) -> Option<u64> {
    message_id.strip_prefix("msg-")?.parse().ok()
}

fn receipt_handle(sequence: u64, receive_count: u32) -> String {
    format!("{}#{receive_count}", message_id(sequence))
}

fn parse_receipt_handle(handle: &str) -> Option<(u64, u32)> {
    let (message_id, receive_count) = handle.split_once('#')?;
    Some((parse_message_id(message_id)?, receive_count.parse().ok()?))
}
