//! Subsync - crash-safe content subscription sync
//!
//! This library keeps a local copy of versioned, server-published content
//! ("subscriptions") in sync with a remote origin. Updates arrive as zip
//! archives that carry either full content or hash-verified per-file
//! patches, and every step of applying them is persisted so that a process
//! killed at any point resumes exactly where it stopped.
//!
//! # Components
//!
//! - [`sequence`]: runs asynchronous steps one at a time, in order
//! - [`unpack`]: the unzip, patch, clean and post-unpack state machine
//! - [`subscription`]: update checks, resumable downloads, refresh
//!   coalescing and destructive recovery for one feed
//! - [`manager`]: owns all subscriptions and their shared resources
//!
//! Collaborators sit behind traits: [`StateStore`] for durable state,
//! [`ContentClient`] for HTTP, [`ArchiveExtractor`] for zip files and
//! [`Connectivity`] for the network type.

pub mod archive;
pub mod config;
pub mod error;
pub mod hash;
pub mod manager;
pub mod network;
pub mod sequence;
pub mod state;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod unpack;

pub use archive::{ArchiveExtractor, ZipExtractor};
pub use config::{ConfigFile, SubscriptionConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use manager::{ManagerBuilder, SubscriptionManager};
pub use network::{Connectivity, NetworkType, StaticConnectivity};
pub use state::{DownloadPolicy, Settings, SubscriptionState, UnpackStatus, UpdateStatus};
pub use store::{FileStateStore, Locals, MemoryStateStore, StateStore};
pub use subscription::{RefreshHandle, RefreshOutcome, SkipReason, Subscription, SubscriptionStatus};
pub use transport::{BoxFuture, ContentClient, HttpClient, UpdateCheckResponse};
pub use unpack::{ListenerResult, PostUnpackListener, UnpackEvent, UnpackReport, Unpacker};
