//! Mission event protocol: typed events plus envelope for realtime delivery.
//!
//! A producer builds a [`MissionEvent`], serializes it to a JSON object
//! (`type` + payload), and the bus injects an [`Envelope`] (`_msg_id`,
//! `timestamp`, optional `mission_id` / `session_id`) before fan-out.
//! [`content_hash`] gives the dedup key: identical content aimed at the same
//! target set hashes equal regardless of `_msg_id`.

mod envelope;
mod event;

pub use envelope::{content_hash, Envelope};
pub use event::MissionEvent;
