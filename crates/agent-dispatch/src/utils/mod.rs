//! Small text helpers shared by titles and feedback.

pub mod text_utils;

pub use text_utils::TextUtils;
