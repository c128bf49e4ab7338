//! Label sets and the value types that travel through the sluice pipeline.
//!
//! Every series is identified by its [`Labels`], a sorted set of name/value pairs. Besides plain
//! float samples, a series can carry [`Exemplar`]s, integer [`Histogram`]s,
//! [`FloatHistogram`]s and [`Metadata`].
//!
//! ```
//! use sluice_labels::Labels;
//!
//! let labels = Labels::from_pairs([("job", "node"), ("__name__", "up")]);
//! assert_eq!(labels.to_string(), r#"{__name__="up", job="node"}"#);
//! ```

#![warn(missing_docs)]

mod labels;
mod value;

pub use self::labels::*;
pub use self::value::*;
