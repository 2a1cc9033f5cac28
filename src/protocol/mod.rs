// src/protocol/mod.rs

//! The RESP wire protocol: the frame type, its codec, and typed decoders
//! for the small set of control-plane replies this client interprets.

pub mod decode;
pub mod resp_frame;

pub use decode::{MasterAddr, PushMessage};
pub use resp_frame::{RespFrame, RespFrameCodec};
