//! Plugin loading and execution for LogDoctor
//!
//! A plugin is one directory in the synced cache, named by its stable
//! identifier and containing a `check.json` entry file. The entry file
//! exposes one of two capabilities, resolved by inspecting its keys:
//! declarative regex rules run in-process, or an external command run as a
//! subprocess that reports JSON on stdout. Either way execution is isolated
//! per handle and the output is normalized into the canonical
//! `Finding`/`PluginReport` types.
//!
//! # Architecture
//!
//! - **types**: `Finding`, `PluginReport`, `AnalysisReport` and the
//!   result-shape normalization
//! - **loader**: entry-file parsing, capability resolution, and the
//!   identifier-to-handle map with explicit invalidation
//! - **runner**: execution of both capabilities against an input directory
//!
//! # Cache Directory Structure
//!
//! ```text
//! ~/.logdoctor/plugins/
//! ├── sha_manifest.json
//! ├── E001/
//! │   ├── check.json
//! │   └── solution.md
//! └── net-check/
//!     └── check.json
//! ```
//!
//! # Example check.json (rule capability)
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "code": "E001",
//!       "title": "Connection refused",
//!       "detail": "The controller could not reach the device.",
//!       "pattern": "connection refused",
//!       "file_name": "gui.log"
//!     }
//!   ]
//! }
//! ```

pub mod loader;
pub mod runner;
pub mod types;

pub use loader::{EntryCapability, PluginHandle, PluginLoader};
pub use runner::{discover_input_files, execute, INPUT_EXTENSIONS};
pub use types::{normalize_report, AnalysisReport, Finding, PluginReport};
