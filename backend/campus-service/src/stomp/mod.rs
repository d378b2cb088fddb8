pub mod frame;

pub use frame::{decode_frames, Command, Frame, FrameError};
