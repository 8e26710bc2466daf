//! Output formatters for scan results.
//!
//! The JSON report is the hand-off to the interactive UI and the file-action
//! collaborator.
//!
//! ```no_run
//! use vidupe::duplicates::DuplicateFinder;
//! use vidupe::error::ExitCode;
//! use vidupe::output::JsonOutput;
//! use std::path::PathBuf;
//!
//! let finder = DuplicateFinder::with_defaults();
//! let (groups, summary) = finder
//!     .find_duplicates_in_paths(&[PathBuf::from("/videos")])
//!     .unwrap();
//! let output = JsonOutput::new(&groups, &[], &summary, ExitCode::Success);
//! println!("{}", output.to_json_pretty().unwrap());
//! ```

pub mod json;

pub use json::{JsonOutput, JsonOutputError};
