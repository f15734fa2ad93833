// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Error types for class decoding and verification runs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while decoding class files or indexing class directories
#[derive(Debug, Error)]
pub enum ClassFileError {
    #[error("Invalid magic number {0:#010x}")]
    InvalidMagic(u32),

    #[error("Class file is truncated")]
    Truncated,

    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("Constant pool index {0} does not point to the expected entry")]
    BadConstantIndex(u16),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed class file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Result type for class decoding
pub type ClassFileResult<T> = std::result::Result<T, ClassFileError>;

/// The classpath itself could not be consulted.
///
/// Unlike a missing class, which is reported as a problem, this aborts the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Classpath {classpath} is unavailable: {reason}")]
pub struct ResolutionError {
    pub classpath: String,
    pub reason: String,
}

impl ResolutionError {
    pub fn new(classpath: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            classpath: classpath.into(),
            reason: reason.into(),
        }
    }
}

/// Run-aborting verification errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    ClasspathUnavailable(#[from] ResolutionError),

    #[error("Verification was interrupted")]
    Interrupted,
}
