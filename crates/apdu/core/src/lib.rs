//! Core traits and types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types and traits for talking to smart
//! card security tokens according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! The stack is layered bottom-up:
//!
//! - [`CardTransport`]: opaque byte pipe to the card
//! - [`ApduProcessor`]: encodes commands (short or extended form), splits long
//!   commands into chained frames and reassembles chained responses
//! - [`Executor`]: owns a transport and the active processor; secure
//!   messaging is installed by swapping the processor
//! - [`ApplicationSession`]: selects an application, learns its [`Version`]
//!   and gates operations on [`Feature`]s
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod executor;
pub mod processor;
pub mod response;
pub mod session;
pub mod transport;

pub use command::{Command, ExpectedLength};
pub use error::{Error, Result, ResultExt};
pub use executor::{CardExecutor, Executor};
pub use processor::{
    ApduFormat, ApduProcessor, ChainedResponseProcessor, MaxApduSize, ProcessorConfig,
};
pub use response::Response;
pub use response::status::StatusWord;
pub use session::{ApplicationSession, Feature, Requirement, SessionState, Version};
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    // Core types
    pub use crate::{Bytes, BytesMut, Error, Result, ResultExt};

    // Command related
    pub use crate::command::{Command, ExpectedLength};

    // Response related
    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    // Transport layer
    pub use crate::{CardTransport, TransportError};

    // Processor layer
    pub use crate::processor::{
        ApduFormat, ApduProcessor, ChainedResponseProcessor, MaxApduSize, ProcessorConfig,
    };

    // Executor layer
    pub use crate::executor::{CardExecutor, Executor};

    // Session layer
    pub use crate::session::{ApplicationSession, Feature, Requirement, SessionState, Version};
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.class(), 0x00);
        assert_eq!(cmd.instruction(), 0xA4);
        assert_eq!(cmd.p1(), 0x04);
        assert_eq!(cmd.p2(), 0x00);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let resp = Response::success(data.clone());
        assert!(resp.is_success());
        assert_eq!(resp.payload(), data.as_ref());
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
