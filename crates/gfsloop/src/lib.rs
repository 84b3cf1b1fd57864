//! gfsloop: GFS forecast-run discovery and retrieval.
//!
//! Polls the NOMADS filter service for the newest GFS run whose every
//! requested file is published, and mirrors that run into a local
//! directory tree for rendering and presentation tools to read.
//!
//! # Architecture
//!
//! ```text
//! cron ──► Scheduler ──► Resolver ──► ForecastSource (HTTP HEAD / GET)
//!                          │
//!                          └──► LocalStore ──► StoreConsumer(s)
//!                               {root}/{category}/gfs.tHHz.pgrb2.RES.fSSS.grib2
//! ```
//!
//! # Modules
//!
//! - [`config`] — YAML configuration with defaults and validation.
//! - [`run`] — Run identifiers, candidate selection and forecast steps.
//! - [`variable`] — Requested fields and their upstream vocabulary.
//! - [`target`] — Remote locator and local path of each file.
//! - [`source`] — Upstream abstraction and the reqwest-backed client.
//! - [`store`] — Clear-then-repopulate local directory tree.
//! - [`resolver`] — Newest-complete-run selection and download.
//! - [`consumer`] — Post-fetch strategies, including the manifest writer.
//! - [`scheduler`] — Cron-driven cycles with graceful shutdown.

pub mod config;
pub mod consumer;
pub mod resolver;
pub mod run;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod target;
pub mod variable;

pub use config::{Config, ConfigError};
pub use consumer::{ManifestWriter, StoreConsumer};
pub use resolver::{FetchError, FetchOutcome, FetchedRun, Resolver, RunSummary, TargetFailure};
pub use run::{ForecastStep, RolloverPolicy, RunIdentifier};
pub use source::{ForecastSource, HttpSource, SourceError};
pub use store::{LocalStore, StoreError};
pub use target::RetrievalTarget;
pub use variable::{Resolution, VariableSpec};
