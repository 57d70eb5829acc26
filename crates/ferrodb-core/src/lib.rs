//! FerroDB Core
//!
//! This crate provides the vocabulary types shared by every FerroDB
//! component: namespace strings, record identifiers, collection UUIDs,
//! the document data model, collection and index options, and the stable
//! error-code table surfaced at the command layer.
//!
//! # Overview
//!
//! - **Identifiers**: [`RecordId`], [`CollectionUuid`], [`OpTime`]
//! - **Naming**: [`NamespaceString`] with the full validation and
//!   drop-pending taxonomy
//! - **Documents**: [`Value`] and [`Document`] with a total ordering
//!   suitable for index keys
//! - **Options**: [`CollectionOptions`] with round-trip guarantees
//! - **Errors**: [`CoreError`] and the numeric [`ErrorCode`] table
//!
//! # Example
//!
//! ```
//! use ferrodb_core::{Document, NamespaceString, Value};
//!
//! let ns = NamespaceString::parse("app.users").unwrap();
//! assert_eq!(ns.db(), "app");
//! assert_eq!(ns.coll(), "users");
//!
//! let doc = Document::new()
//!     .with_field("name", "Ada")
//!     .with_field("logins", 42i64);
//! assert_eq!(doc.get("logins"), Some(&Value::Int(42)));
//! ```

pub mod error;
pub mod options;
pub mod types;

pub use error::{CoreError, ErrorCode};
pub use options::{AutoIndexMode, CollationSpec, CollectionOptions, IndexOptionDefaults};
pub use types::document::{Document, Value};
pub use types::index_key::{IndexKey, KeyPattern, SortDirection};
pub use types::namespace::{NamespaceError, NamespaceString};
pub use types::optime::{OpTime, Timestamp};
pub use types::record_id::RecordId;
pub use types::uuid::CollectionUuid;
