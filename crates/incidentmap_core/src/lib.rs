pub mod config;
pub mod csv_input;
pub mod geocode;
pub mod identity;
pub mod pipeline;
pub mod prompt;
pub mod reconcile;
pub mod record;
pub mod render;
pub mod reverse;
pub mod runtime;
pub mod store;
pub mod wikitext;

#[cfg(test)]
pub(crate) mod test_support;
