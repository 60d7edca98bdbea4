// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory tables of loaded holders.
//!
//! Holders are referred to by identifier only, never by pointer from other holders, so any of
//! them can be dropped from its table without leaving dangling references behind.
mod groups;
mod tracks;
mod users;

pub use groups::GroupManager;
pub use tracks::TrackManager;
pub use users::UserManager;
