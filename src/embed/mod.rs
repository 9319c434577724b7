pub mod hashing;

pub use hashing::{embed_paper, embed_text, EMBEDDING_DIMENSION};
