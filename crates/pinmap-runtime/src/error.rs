#![forbid(unsafe_code)]

//! Runtime error types.

use pinmap_core::engine::EngineError;

/// Source/layer lifecycle failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    /// The source exists already; the caller must uninstall first.
    #[error("source '{0}' is already installed; uninstall it first")]
    AlreadyInstalled(String),
    /// The source or one of its layers vanished before uninstall.
    #[error("source '{0}' is not installed")]
    NotInstalled(String),
    /// The layer set reads from a different source than the one installed.
    #[error("layer set reads from '{found}' but source '{expected}' is being installed")]
    SourceMismatch { expected: String, found: String },
    /// A layer failed to install; everything added before it was rolled back.
    #[error("install of source '{source_id}' failed at layer '{layer_id}'")]
    PartialInstall {
        source_id: String,
        layer_id: String,
        #[source]
        cause: EngineError,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl LifecycleError {
    /// Double install or double uninstall: a caller bug rather than an
    /// engine failure.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::AlreadyInstalled(_) | Self::NotInstalled(_))
    }
}

/// Marker icon registration failures. Both are fatal to point rendering.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IconError {
    #[error("failed to load icon '{icon_id}' from '{url}'")]
    Load {
        icon_id: String,
        url: String,
        #[source]
        cause: EngineError,
    },
    #[error("failed to register icon '{icon_id}'")]
    Register {
        icon_id: String,
        #[source]
        cause: EngineError,
    },
}

/// Errors surfaced by [`crate::UserClusterMap`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no cluster layers are installed")]
    NotMounted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_are_only_double_install_and_uninstall() {
        assert!(LifecycleError::AlreadyInstalled("users".into()).is_violation());
        assert!(LifecycleError::NotInstalled("users".into()).is_violation());
        assert!(
            !LifecycleError::Engine(EngineError::MissingLayer("x".into())).is_violation()
        );
    }

    #[test]
    fn partial_install_exposes_cause() {
        let err = LifecycleError::PartialInstall {
            source_id: "users".into(),
            layer_id: "users-clusters".into(),
            cause: EngineError::LayerExists("users-clusters".into()),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("layer 'users-clusters' already exists")
        );
    }
}
