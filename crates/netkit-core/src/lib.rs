#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Transport-agnostic request model, error taxonomy and collaborator traits.
//!
//! Layout: `model.rs` (ids and DTOs), `error.rs` (caller-visible error kinds),
//! `request/` (request descriptions, encoding, multipart bodies), `service/`
//! (transport, auth, connectivity, encryption and diagnostics seams).

pub mod error;
pub mod model;
pub mod request;
pub mod service;

pub use error::{RequestBuildError, RequestError, transport_code};
pub use model::{
    ActiveOperation, AuthChallenge, AuthDetail, AuthMethod, ChallengeDisposition, Credential,
    RequestId, ResponseMeta, TaskId, TransportFailure,
};
pub use netkit_events::{RequestState, RequestType};
pub use request::multipart::MultipartBody;
pub use request::{
    BodyEncoding, BodyEncryption, DEFAULT_TIMEOUT, HttpMethod, HttpRequest, QueryEncoding,
    WireRequest, parse_header,
};
pub use service::{
    ArtifactSummary, AuthResolver, BodyEncryptor, Connectivity, DefaultAuthResolver,
    DiagnosticsSink, NullDiagnostics, TransactionOutcome, TransactionRecord, Transport,
    TransportEvent, TransportEventSink,
};
