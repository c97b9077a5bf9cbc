use std::time::Duration;

use crate::protocol::rpc::RetransmissionMode;
use crate::protocol::xdr::CharacterEncoding;

/// Default timeout of a call, of a single transmission and of the
/// retransmission interval.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default size of the encoding and decoding buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Settings a client is created with. All of them except the buffer size and
/// the connect timeout can be changed later on the client itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Overall time a call may take. Zero turns every call into a batch
    /// call that does not wait for a reply.
    pub timeout: Duration,
    /// Bound on a single send, and on TCP on receiving the rest of a record.
    pub transmission_timeout: Duration,
    /// UDP only: interval after which an unanswered call is sent again. Set
    /// it to `timeout` to disable retransmission.
    pub retransmission_timeout: Duration,
    pub retransmission_mode: RetransmissionMode,
    pub buffer_size: usize,
    pub character_encoding: CharacterEncoding,
    /// TCP only.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            transmission_timeout: DEFAULT_TIMEOUT,
            retransmission_timeout: DEFAULT_TIMEOUT,
            retransmission_mode: RetransmissionMode::Fixed,
            buffer_size: DEFAULT_BUFFER_SIZE,
            character_encoding: CharacterEncoding::Utf8,
            connect_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transmission_timeout(mut self, timeout: Duration) -> Self {
        self.transmission_timeout = timeout;
        self
    }

    pub fn with_retransmission(mut self, timeout: Duration, mode: RetransmissionMode) -> Self {
        self.retransmission_timeout = timeout;
        self.retransmission_mode = mode;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_character_encoding(mut self, encoding: CharacterEncoding) -> Self {
        self.character_encoding = encoding;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
