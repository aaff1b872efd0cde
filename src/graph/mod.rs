//! Graph Encryption Pipeline and its runtime counterpart.

pub(crate) mod archive;
mod boundary;
mod encrypt;
pub(crate) mod index;
mod rewrite;
pub(crate) mod schema;
pub(crate) mod traversal;

pub use boundary::*;
pub use encrypt::{Encrypt, EncryptedBundle};
pub use rewrite::{PromptRequest, PromptRewriter};
