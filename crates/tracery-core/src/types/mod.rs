//! Core types shared by the resolver and trace aggregates.

pub mod address;
pub mod frame;

pub use address::Address;
pub use frame::{FrameWithInlines, ObjectFrame, ResolvedFrame};
