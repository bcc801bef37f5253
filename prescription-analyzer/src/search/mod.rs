pub mod engine;
pub mod selector;

pub use engine::{QUERY_SUFFIX, SearchStage, query_for};
pub use selector::{PREFERRED_DOMAINS, SiteSelector, choose_result};
