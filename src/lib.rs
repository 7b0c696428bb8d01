pub mod config;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod gff;
pub mod import;
pub mod merge;
pub mod output;
pub mod parser;
pub mod source;
pub mod store;
pub mod tabix;
pub mod typeahead;

pub use domain::contig_name_to_id;
pub use import::{import_features, reset_store};
pub use typeahead::suggest;
