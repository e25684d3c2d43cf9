#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod provider;
pub use provider::AlloyChainProvider;

mod error;
pub use error::{classify, parse_retry_after};
