//! Core model of the TAPI API-testing workbench.
//!
//! This crate holds everything that does not touch the network or a database:
//! the value-type taxonomy, the endpoint catalog and its Swagger parser, the
//! request/response records and the communication log, tokens, random test
//! data, and the entity-to-table map used for verification. The
//! `tapi-session` crate drives it against a live API.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | [`DataKind`], [`TypedValue`], [`FieldValue`] and value coercion |
//! | [`http`] | [`HttpMethod`], [`ContentType`], [`DataFlow`] |
//! | [`endpoint`] | [`Endpoint`], [`Parameter`], [`Attribute`] |
//! | [`catalog`] | [`Catalog`], discovery-reply and Swagger parsing |
//! | [`message`] | [`Request`], [`Response`], [`Communication`], [`CommunicationLog`] |
//! | [`token`] | [`Token`], [`Credentials`], [`GrantType`] |
//! | [`random`] | Random values per [`DataKind`] |
//! | [`tables`] | Entity name to database table map |
//! | [`render`] | Plain-text rendering |
//!
//! # Quick start
//!
//! ```rust
//! use tapi::{Catalog, HttpMethod};
//!
//! let mut catalog = Catalog::new();
//! let reply = br#"{"Data":[{"Modules":[{"Name":"Core","Entities":[
//!     {"Methods":[{"Name":"v1.0/Company","HttpMethod":"GET"}]}]}]}]}"#;
//! catalog.parse_endpoints_reply(reply).unwrap();
//! assert!(catalog.select("v1.0/Company", HttpMethod::Get).is_some());
//! ```

pub mod catalog;
pub mod endpoint;
pub mod http;
pub mod message;
pub mod random;
pub mod render;
pub mod tables;
pub mod token;
pub mod types;

pub use catalog::{Catalog, SchemaError, Selection};
pub use endpoint::{Attribute, Endpoint, Parameter};
pub use http::{ContentType, DataFlow, HttpMethod};
pub use message::{
    Communication, CommunicationLog, CorrelationId, RawReply, ReplyStatus, Request,
    RequestPurpose, Response, StateAttributes,
};
pub use random::random_value;
pub use token::{Credentials, GrantType, Token};
pub use types::{is_value_convertible, DataKind, FieldValue, TypedValue};
