//! Message tags, protocol version negotiation and the per-connection state machine (§4.C).
//! Pure logic, no I/O — the `connection` module is the thin tokio adapter around it (§9 design
//! note).

mod handshake;
mod messages;
mod state;

pub use handshake::{build_handshake, choose_version, negotiate_version, ProtocolVersion};
pub use messages::{tag, Request, RequestBody};
pub use state::{AccessMode, ClientState, ServerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Minimum supported versions, highest first within a major, per §4.C: "at least protocol
    /// versions 3.0, 4.1-4.4 and 5.0-5.6".
    pub fn supported() -> Vec<Version> {
        let mut versions = Vec::new();
        for minor in (0..=6).rev() {
            versions.push(Version::new(5, minor));
        }
        for minor in (1..=4).rev() {
            versions.push(Version::new(4, minor));
        }
        versions.push(Version::new(3, 0));
        versions
    }

    pub fn supports_auth_state(&self) -> bool {
        *self >= Version::new(5, 1)
    }

    pub fn supports_route_message(&self) -> bool {
        *self >= Version::new(4, 3)
    }

    pub fn supports_telemetry(&self) -> bool {
        *self >= Version::new(5, 4)
    }

    pub fn supports_qid(&self) -> bool {
        *self >= Version::new(4, 0)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
