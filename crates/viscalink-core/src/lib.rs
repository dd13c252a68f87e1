//! viscalink-core: shared foundation of the Viscalink gateway.
//!
//! Viscalink tunnels VISCA camera control and NDI tally signalling between a
//! control site and a camera site over a single SRT channel. Two peers share
//! this crate:
//!
//! ```text
//! controllers ── TCP ──► viscalink-client ══ SRT ══► viscalink-server ── TCP ──► cameras
//!                        (multiplexer)               (demultiplexer + tally)
//! ```
//!
//! The crate holds everything both peers agree on: the wire framing for the
//! SRT channel ([`frame`]), the VISCA structural sanity check ([`visca`]),
//! the JSON configuration model ([`config`]), and the error taxonomy
//! ([`error`]). It performs no I/O.

pub mod config;
pub mod error;
pub mod frame;
pub mod visca;

pub use error::{ConfigError, FrameError, RoutingError};
pub use frame::{Message, TallyFrame, TallyState, ViscaFrame, ViscaType};
