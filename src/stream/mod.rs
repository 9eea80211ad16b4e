//! Stream transport: turns a subscription into a server-sent event stream.

mod adapter;
pub mod sse;

pub use adapter::{
    ChannelSink, CloseReason, EventStream, FrameReceiver, FrameSink, StreamConfig, StreamHandle,
    StreamOutcome, WriteSink,
};
