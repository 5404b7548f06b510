//! Options accepted by pipelines and effects.

use serde::{Deserialize, Serialize};

use crate::reactive::Scope;

/// Construction options for [`EffectPipe`](crate::EffectPipe),
/// [`DerivedPipe`](crate::DerivedPipe) and [`Effect`](crate::reactive::Effect).
///
/// Only the debug name is serializable; the scope is a live handle.
///
/// ```rust
/// use sigpipe_core::PipeOptions;
///
/// let options: PipeOptions = serde_json::from_str(r#"{ "debug_name": "search" }"#).unwrap();
/// assert_eq!(options.debug_name.as_deref(), Some("search"));
/// assert!(options.scope.is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeOptions {
    /// Name used in log output. Diagnostic only.
    pub debug_name: Option<String>,

    /// Scope that owns any effect the pipeline creates. Falls back to the
    /// scope entered on the current thread.
    #[serde(skip)]
    pub scope: Option<Scope>,
}

impl PipeOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn in_scope(mut self, scope: &Scope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    /// Derive options for an inner stage, suffixing the debug name.
    pub(crate) fn child(&self, suffix: &str) -> Self {
        Self {
            debug_name: self
                .debug_name
                .as_ref()
                .map(|name| format!("{name}.{suffix}")),
            scope: self.scope.clone(),
        }
    }
}
