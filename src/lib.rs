//! OAuth 2.0 authorization bridge and per-principal token broker for accounting APIs.
//!
//! The crate proxies a downstream client's authorization-code flow onto an upstream
//! provider, keeps one fresh upstream credential per principal with single-flight refresh,
//! persists credentials behind a pluggable store, and bounds outbound API traffic with a
//! sliding-window governor feeding a paginated fetch engine.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod auth;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod ext;
pub mod fetch;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
#[cfg(feature = "server")] pub mod server;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
