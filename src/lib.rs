// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::type_complexity)]

//! gor-pipe: a streaming query engine for genomic-position-ordered rows
//!
//! Rows are tab-separated and sorted by chromosome then position. Queries
//! chain operators with `|`, and every operator preserves that order.
//!
//! # Features
//!
//! - **Streaming**: pull-based row sources with seek and range restriction
//! - **Parallel**: `pgor`, `parallel` and `partgor` fan queries out over a
//!   bounded worker pool and merge the partial results back in order
//! - **Dictionaries**: `.gord` tables over many files, filtered by tag and
//!   range without opening unrelated files
//! - **Caching**: `create` statements are materialized once per signature
//!
//! # Example
//!
//! ```rust,no_run
//! use gor_pipe::config::SessionConfig;
//! use gor_pipe::query::Session;
//!
//! let session = Session::new(SessionConfig::from_env()).unwrap();
//! let stdout = std::io::stdout();
//! session
//!     .run("gor genes.gor | where len(gene) > 3 | top 10", stdout.lock())
//!     .unwrap();
//! ```

pub mod commands;
pub mod config;
pub mod dictionary;
pub mod expr;
pub mod genome;
pub mod gor;
pub mod parallel;
pub mod query;
pub mod row;
pub mod streaming;

// Re-export commonly used types
pub use gor::{ErrorCategory, GorError, Result};
pub use query::Session;
pub use row::{Header, Row};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{Pipeline, Step};
    pub use crate::config::SessionConfig;
    pub use crate::genome::{ChromOrder, Genome, KeyRange};
    pub use crate::gor::{ErrorCategory, GorError, Result};
    pub use crate::query::Session;
    pub use crate::row::{Header, Row};
    pub use crate::streaming::{BoxedSource, GorWriter, RowSource};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_basic_workflow() {
        let session = Session::new(SessionConfig::new()).unwrap();
        let mut out = Vec::new();
        let stats = session
            .run("gorrows -p chr1:0-5 | where pos >= 2 | calc next pos + 1", &mut out)
            .unwrap();
        assert_eq!(stats.rows_out, 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next(), Some("chrom\tpos\tnext"));
        assert_eq!(text.lines().nth(1), Some("chr1\t2\t3"));
    }

    #[test]
    fn test_error_categories() {
        let session = Session::new(SessionConfig::new()).unwrap();
        let err = session.execute("gorrows -p chr1:0-5 | nosuchcommand").err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Parsing);
        assert_eq!(err.command(), Some("NOSUCHCOMMAND"));
    }
}
