//! Host-side helpers: build requests for the dispatcher and decode its
//! responses.
//!
//! The host sits outside the mesh and talks only to the dispatcher, always
//! with [`NodeId::HOST`] as source. Every request eventually gets exactly one
//! response: a success, a terminal error forwarded from a shard, or a
//! `Failure` once the dispatcher runs out of retries.

use std::time::Duration;

use crate::error::KvError;
use crate::types::{Command, Datum, NodeId, RequestId, Status};
use crate::wire::Message;

/// Request builder for the external host.
///
/// # Examples
///
/// ```
/// use meshkv::client::HostClient;
/// use meshkv::{Command, NodeId, RequestId};
///
/// let mut client = HostClient::new(NodeId::new(0, 0, 0));
/// let put = client.put("color", "blue");
/// let pull = client.pull("color");
///
/// assert_eq!(put.command, Command::Put);
/// assert_eq!(put.source, NodeId::HOST);
/// assert_eq!(pull.id, RequestId(2));
/// ```
#[derive(Debug, Clone)]
pub struct HostClient {
    dispatcher: NodeId,
    next_id: RequestId,
}

impl HostClient {
    /// A client talking to `dispatcher`.
    pub fn new(dispatcher: NodeId) -> Self {
        Self {
            dispatcher,
            next_id: RequestId(1),
        }
    }

    /// Build a `Put` request.
    pub fn put(&mut self, key: impl Into<Datum>, value: impl Into<Datum>) -> Message {
        self.request(Command::Put, key.into(), value.into())
    }

    /// Build a `Pull` request.
    pub fn pull(&mut self, key: impl Into<Datum>) -> Message {
        self.request(Command::Pull, key.into(), Datum::empty())
    }

    /// Build a `Clear` request.
    pub fn clear(&mut self) -> Message {
        self.request(Command::Clear, Datum::empty(), Datum::empty())
    }

    fn request(&mut self, command: Command, key: Datum, value: Datum) -> Message {
        let id = self.next_id;
        self.next_id = id.next();
        Message::request(command, id, NodeId::HOST, self.dispatcher, key, value)
    }

    /// The dispatcher this client talks to.
    pub fn dispatcher(&self) -> NodeId {
        self.dispatcher
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The put was appended.
    Stored,
    /// The pull found a value.
    Found(Datum),
    /// The pull found nothing.
    NotFound,
    /// Every shard was cleared.
    Cleared,
    /// The chosen shard had no room.
    OutOfSpace,
    /// The chosen shard refused the record.
    Rejected,
    /// The dispatcher gave up.
    RetryExhausted,
}

/// A decoded dispatcher response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    /// The client's request id.
    pub id: RequestId,
    /// Key of the request.
    pub key: Datum,
    /// How it ended.
    pub outcome: Outcome,
    /// Node that decided the outcome (the answering shard, or the dispatcher).
    pub from: NodeId,
    /// Time between first dispatch and the response.
    pub elapsed: Duration,
}

impl ClientResponse {
    /// Interpret a message sent to the host; `None` for anything that is not
    /// a response.
    pub fn from_message(message: Message) -> Option<Self> {
        let outcome = match (message.command, message.status) {
            (Command::Failure, _) | (_, Status::RetryExhausted) => Outcome::RetryExhausted,
            (command, _) if command.is_request() => return None,
            (_, Status::OutOfSpace) => Outcome::OutOfSpace,
            (_, Status::Rejected) => Outcome::Rejected,
            (Command::PutReply, Status::Ok) => Outcome::Stored,
            (Command::PullReply, Status::Ok) => Outcome::Found(message.value),
            (Command::PullReply, Status::NotFound) => Outcome::NotFound,
            (Command::ClearReply, Status::Ok) => Outcome::Cleared,
            (command, status) => {
                tracing::warn!(?command, ?status, "unexpected response shape");
                return None;
            }
        };
        Some(Self {
            id: message.id,
            key: message.key,
            outcome,
            from: message.source,
            elapsed: message.elapsed,
        })
    }

    /// Whether the request succeeded (a pull miss counts as an answer, not a
    /// success).
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Stored | Outcome::Found(_) | Outcome::Cleared
        )
    }

    /// Convert into the value a caller expects, surfacing errors as [`KvError`].
    pub fn into_result(self) -> Result<Option<Datum>, KvError> {
        match self.outcome {
            Outcome::Stored | Outcome::Cleared => Ok(None),
            Outcome::Found(value) => Ok(Some(value)),
            Outcome::NotFound => Err(KvError::NotFound),
            Outcome::OutOfSpace => Err(KvError::OutOfSpace { shard: self.from }),
            Outcome::Rejected => Err(KvError::Rejected { shard: self.from }),
            Outcome::RetryExhausted => Err(KvError::RetryExhausted {
                elapsed: self.elapsed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISPATCHER: NodeId = NodeId::new(0, 0, 0);
    const SHARD: NodeId = NodeId::new(1, 0, 2);

    fn response(command: Command, status: Status, value: Datum) -> Message {
        Message {
            command,
            status,
            id: RequestId(4),
            source: SHARD,
            dest: NodeId::HOST,
            elapsed: Duration::from_millis(8),
            key: Datum::text("k"),
            value,
        }
    }

    #[test]
    fn test_ids_increase() {
        let mut client = HostClient::new(DISPATCHER);
        let ids: Vec<_> = (0..3).map(|_| client.clear().id).collect();
        assert_eq!(ids, vec![RequestId(1), RequestId(2), RequestId(3)]);
    }

    #[test]
    fn test_found_into_value() {
        let resp = ClientResponse::from_message(response(
            Command::PullReply,
            Status::Ok,
            Datum::text("v"),
        ))
        .expect("response");
        assert!(resp.is_success());
        assert_eq!(resp.into_result(), Ok(Some(Datum::text("v"))));
    }

    #[test]
    fn test_error_outcomes() {
        let message = response(Command::PutReply, Status::OutOfSpace, Datum::empty());
        let oos = ClientResponse::from_message(message).expect("response");
        assert_eq!(oos.into_result(), Err(KvError::OutOfSpace { shard: SHARD }));

        let message = response(Command::PullReply, Status::NotFound, Datum::empty());
        let miss = ClientResponse::from_message(message).expect("response");
        assert!(!miss.is_success());
        assert_eq!(miss.into_result(), Err(KvError::NotFound));

        let message = response(Command::Failure, Status::RetryExhausted, Datum::empty());
        let failure = ClientResponse::from_message(message).expect("response");
        assert_eq!(
            failure.into_result(),
            Err(KvError::RetryExhausted {
                elapsed: Duration::from_millis(8)
            })
        );
    }

    #[test]
    fn test_requests_are_not_responses() {
        let mut client = HostClient::new(DISPATCHER);
        let request = client.put("k", "v");
        assert!(ClientResponse::from_message(request).is_none());
    }
}
