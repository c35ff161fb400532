/// Errors raised while resolving a builder for a calling context.
///
/// Every variant except [`BuilderError::ContextBusy`] is a configuration error:
/// it points at a missing or broken builder registration, so retrying the same
/// request cannot succeed.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("no constructor registered for builder: {variant}")]
    Unregistered { variant: &'static str },
    #[error("failed to instantiate builder: {variant}")]
    Instantiation {
        variant: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("builder already registered: {variant}")]
    DuplicateRegistration { variant: &'static str },
    #[error("thread-local builder context is already borrowed on this thread")]
    ContextBusy,
}

impl BuilderError {
    /// Returns true for fatal registration or construction defects.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::ContextBusy)
    }

    /// Builder type name the error refers to, if any.
    #[must_use]
    pub fn variant(&self) -> Option<&'static str> {
        match self {
            Self::Unregistered { variant }
            | Self::Instantiation { variant, .. }
            | Self::DuplicateRegistration { variant } => Some(variant),
            Self::ContextBusy => None,
        }
    }
}
