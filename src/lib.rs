//! Workspace root crate; see the member crates under `crates/`.
