//! Root node: embedded `README.md` and the backward-compat symlink targets.

/// Embedded at build time so the mount's own documentation ships with the
/// binary.
pub const README: &str = include_str!("../../../README.md");

pub fn compat_target(target: super::super::path::CompatTarget, default_backend: &str) -> String {
    use super::super::path::CompatTarget::*;
    match target {
        Model => format!("backend/{default_backend}/model"),
        Conversation => format!("backend/{default_backend}/conversation"),
        Send => format!("backend/{default_backend}/model/default/new"),
    }
}
