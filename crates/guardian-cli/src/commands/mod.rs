//! Subcommand implementations

pub mod ask;
pub mod benchmark;
pub mod config;
pub mod models;

use guardian_inference::{AgeGroup, QueryCategory};

/// Comma separated tag list, or `all` when every value is present.
pub(crate) fn tags<T: std::fmt::Display>(values: impl IntoIterator<Item = T>, total: usize) -> String {
    let names: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    if names.len() == total {
        "all".to_string()
    } else {
        names.join(",")
    }
}

pub(crate) fn age_tags<'a>(groups: impl IntoIterator<Item = &'a AgeGroup>) -> String {
    tags(groups, AgeGroup::ALL.len())
}

pub(crate) fn category_tags<'a>(categories: impl IntoIterator<Item = &'a QueryCategory>) -> String {
    tags(categories, QueryCategory::ALL.len())
}
