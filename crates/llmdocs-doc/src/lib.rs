//! Chat transcript documents backed by plain files.

pub mod error;
pub mod frontmatter;
pub mod links;
pub mod llm_doc;
pub mod transcript;
pub mod vault;

pub use error::DocError;
pub use frontmatter::{DocFrontmatter, FrontmatterSplit};
pub use links::{
    preprocess_messages, split_keeping_separators, LinkFuture, LinkResolver, NoLinks, SplitPart,
};
pub use llm_doc::{DocCompletion, DocContents, DocDefaults, DocProperties, LlmDoc};
pub use transcript::{messages_to_text, text_to_messages};
pub use vault::{next_free_doc_path, Vault, VaultImageResolver, VaultTextResolver};
