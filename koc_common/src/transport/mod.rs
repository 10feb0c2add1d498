//! Message-queue style sockets over TCP.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by the
//! payload. Connecting sides retry in the background, so a client may start
//! before the server is listening and survives server restarts.
//!
//! | pattern      | binds                | connects            |
//! |--------------|----------------------|---------------------|
//! | fan-in       | [`PullSocket`]       | [`PushSocket`]      |
//! | broadcast    | [`PubSocket`]        | [`SubSocket`]       |
//! | handshake    | [`RepSocket`]        | [`ReqSocket`]       |

use std::time::Duration;

use tokio_util::codec::LengthDelimitedCodec;

use crate::codec::MAX_FRAME_LEN;

mod pub_sub;
mod push_pull;
mod req_rep;

pub use pub_sub::{PubSocket, SubSocket};
pub use push_pull::{PullSocket, PushSocket};
pub use req_rep::{RepSocket, ReqSocket, Request};

const RECONNECT_INTERVAL: Duration = Duration::from_millis(200);
/// Frames buffered per socket before the sender sees backpressure.
const BUFFER_FRAMES: usize = 64;

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
