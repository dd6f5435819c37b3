//! Public surface for the `tapi-session` crate.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | [`SessionConfig`] from the environment, server address, database settings |
//! | [`error`] | Error families and the operator-facing [`ErrorReport`] |
//! | [`fixtures`] | Canned replies substituted in test mode |
//! | [`session`] | The [`Session`] orchestrator: build, send, correlate, parse |
//! | [`transport`] | The [`Transport`] seam and its `reqwest` implementation |
//! | [`verify`] | Database cross-checks and API key lookup |

pub mod config;
pub mod error;
pub mod fixtures;
pub mod session;
pub mod transport;
pub mod verify;

pub use config::{ApiServer, DbSettings, Protocol, SessionConfig};
pub use error::{
    ConnectionError, DiscoveryError, ErrorReport, FileError, RequestError, SessionError,
    VerificationError,
};
pub use session::{GeneralRequest, RequestParts, Session};
pub use transport::{ReqwestTransport, Transport};
pub use verify::{sqlite::SqliteExecutor, QueryExecutor, VerificationState};
