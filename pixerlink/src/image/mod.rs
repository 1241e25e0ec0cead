//! Image frame encoding.
//!
//! The panel takes 4-bit grayscale, two pixels per byte, behind a fixed ASCII
//! header. [`ImageEncoder`] turns any common image format into that frame.

pub mod frame;

pub use frame::{
    DEFAULT_HEIGHT, DEFAULT_WIDTH, FRAME_HEADER, ImageEncoder, ImageFrame, pack_nibbles,
    unpack_nibbles,
};
